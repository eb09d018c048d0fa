//! Canonical byte encoding and SHA-256 digests for ledger blocks.
//!
//! Every field is written as an 8-byte big-endian length followed by its UTF-8
//! text, so no choice of field contents can collide with another split of the
//! same bytes. Decimals are written in normalized form: trailing zeros are
//! stripped and `-0` becomes `0`, so `50000`, `50000.0` and `50000.00` encode
//! identically.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Leading field of every block encoding. Bump on any layout change.
pub const BLOCK_ENCODING_TAG: &str = "care-ledger/block/v1";

#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buf: Vec<u8>,
}

impl CanonicalEncoder {
    pub fn new(tag: &str) -> Self {
        let mut encoder = Self::default();
        encoder.text(tag);
        encoder
    }

    pub fn text(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();
        self.buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn unsigned(&mut self, value: u64) -> &mut Self {
        self.text(&value.to_string())
    }

    pub fn signed(&mut self, value: i64) -> &mut Self {
        self.text(&value.to_string())
    }

    pub fn decimal(&mut self, value: Decimal) -> &mut Self {
        self.text(&canonical_decimal(value))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn sha256_hex(&self) -> String {
        sha256_hex(&self.buf)
    }
}

pub fn canonical_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn decimal_text_ignores_scale() {
        let a = Decimal::from_str("50000").expect("valid");
        let b = Decimal::from_str("50000.00").expect("valid");
        assert_eq!(canonical_decimal(a), "50000");
        assert_eq!(canonical_decimal(b), "50000");
        assert_eq!(canonical_decimal(Decimal::from_str("0.020").expect("valid")), "0.02");
        assert_eq!(canonical_decimal(Decimal::from_str("-0.00").expect("valid")), "0");
    }

    #[test]
    fn length_prefix_separates_fields() {
        let mut left = CanonicalEncoder::new("t");
        left.text("12").text("3");
        let mut right = CanonicalEncoder::new("t");
        right.text("1").text("23");
        assert_ne!(left.as_bytes(), right.as_bytes());
        assert_ne!(left.sha256_hex(), right.sha256_hex());
    }

    #[test]
    fn field_layout_is_length_then_bytes() {
        let mut encoder = CanonicalEncoder::default();
        encoder.text("ab").unsigned(7);
        assert_eq!(
            encoder.as_bytes(),
            &[0, 0, 0, 0, 0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0, 0, 0, 0, 1, b'7']
        );
    }

    #[test]
    fn long_fields_are_written_whole() {
        let long = "x".repeat(70_000);
        let mut encoder = CanonicalEncoder::default();
        encoder.text(&long);
        let bytes = encoder.as_bytes();
        assert_eq!(bytes.len(), 8 + long.len());
        assert_eq!(&bytes[..8], &(long.len() as u64).to_be_bytes());
        assert_eq!(&bytes[8..], long.as_bytes());
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
