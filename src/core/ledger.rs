use serde::Serialize;
use tracing::{debug, warn};

use super::digest::{BLOCK_ENCODING_TAG, CanonicalEncoder};
use super::error::IntegrityViolation;
use super::types::PensionRecord;

/// `prev_hash` carried by the genesis block.
pub const GENESIS_PREV_HASH: &str = "0";

/// Epoch year of the genesis record when none is configured.
pub const DEFAULT_EPOCH_YEAR: i32 = 2023;

/// Source of block timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> String;
}

/// Local wall-clock time as `YYYY-MM-DD HH:MM:SS`.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Always reports the same instant.
#[derive(Clone, Debug)]
pub struct FixedClock(pub String);

impl Clock for FixedClock {
    fn now(&self) -> String {
        self.0.clone()
    }
}

/// A committed record plus its link to the previous block.
///
/// Fields are fixed at construction. The block hash is not stored; it is
/// recomputed from the fields on every call to [`Block::compute_hash`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    index: u64,
    record: PensionRecord,
    prev_hash: String,
    timestamp: String,
}

impl Block {
    pub fn new(
        index: u64,
        record: PensionRecord,
        prev_hash: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            index,
            record,
            prev_hash: prev_hash.into(),
            timestamp: timestamp.into(),
        }
    }

    fn genesis(epoch_year: i32, timestamp: String) -> Self {
        Self::new(
            0,
            PensionRecord::sentinel(epoch_year),
            GENESIS_PREV_HASH,
            timestamp,
        )
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn record(&self) -> &PensionRecord {
        &self.record
    }

    pub fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn canonical_encoding(&self) -> CanonicalEncoder {
        let record = &self.record;
        let accrual = record.accrual();
        let mut encoder = CanonicalEncoder::new(BLOCK_ENCODING_TAG);
        encoder
            .unsigned(self.index)
            .signed(i64::from(record.year()))
            .decimal(record.salary())
            .unsigned(u64::from(accrual.numerator()))
            .unsigned(u64::from(accrual.denominator()))
            .decimal(record.cpi_index())
            .text(&self.prev_hash)
            .text(&self.timestamp);
        encoder
    }

    /// Lowercase hex SHA-256 of the canonical encoding.
    pub fn compute_hash(&self) -> String {
        self.canonical_encoding().sha256_hex()
    }
}

/// Append-only, hash-linked sequence of blocks. Never empty: the first block
/// is always genesis.
#[derive(Clone, Debug)]
pub struct Ledger {
    blocks: Vec<Block>,
}

impl Ledger {
    pub fn new(epoch_year: i32, genesis_timestamp: impl Into<String>) -> Self {
        Self {
            blocks: vec![Block::genesis(epoch_year, genesis_timestamp.into())],
        }
    }

    pub fn with_clock(epoch_year: i32, clock: &dyn Clock) -> Self {
        Self::new(epoch_year, clock.now())
    }

    /// Builds a ledger from arbitrary blocks, skipping every check, so tests
    /// can stage tampered histories.
    #[cfg(test)]
    pub(crate) fn from_blocks_unchecked(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// Commits `record` as the new tip, stamped with the clock's current time.
    pub fn append(&mut self, record: PensionRecord, clock: &dyn Clock) -> &Block {
        self.append_at(record, clock.now())
    }

    /// Commits `record` as the new tip with an explicit timestamp.
    pub fn append_at(&mut self, record: PensionRecord, timestamp: impl Into<String>) -> &Block {
        let index = self.blocks.len() as u64;
        let prev_hash = self.tip_hash();
        let block = Block::new(index, record, prev_hash, timestamp);
        debug!(index, year = block.record.year(), "appending block");
        self.blocks.push(block);
        &self.blocks[self.blocks.len() - 1]
    }

    /// Walks the chain from genesis and reports the first divergence.
    ///
    /// Tampering with the tip itself is not detectable here: nothing links to
    /// it yet.
    pub fn verify(&self) -> Result<(), IntegrityViolation> {
        let result = self.check_chain();
        if let Err(violation) = &result {
            warn!(
                diverged_at = violation.diverged_at(),
                %violation,
                "ledger failed verification"
            );
        }
        result
    }

    pub fn is_valid(&self) -> bool {
        self.check_chain().is_ok()
    }

    fn check_chain(&self) -> Result<(), IntegrityViolation> {
        let genesis = self.genesis();
        if genesis.index != 0 {
            return Err(IntegrityViolation::GenesisIndex {
                found: genesis.index,
            });
        }
        if genesis.prev_hash != GENESIS_PREV_HASH {
            return Err(IntegrityViolation::GenesisPrevHash {
                found: genesis.prev_hash.clone(),
            });
        }

        let mut prev_hash = genesis.compute_hash();
        for (position, block) in self.blocks.iter().enumerate().skip(1) {
            if block.index != position as u64 {
                return Err(IntegrityViolation::IndexGap {
                    position,
                    found: block.index,
                });
            }
            if block.prev_hash != prev_hash {
                return Err(IntegrityViolation::BrokenLink {
                    index: block.index,
                    expected: prev_hash,
                    found: block.prev_hash.clone(),
                });
            }
            prev_hash = block.compute_hash();
        }
        Ok(())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn blocks_excluding_genesis(&self) -> &[Block] {
        &self.blocks[1..]
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn tip(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip_hash(&self) -> String {
        self.tip().compute_hash()
    }

    pub fn epoch_year(&self) -> i32 {
        self.genesis().record.year()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when nothing but genesis has been committed.
    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AccrualRate;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const GENESIS_TS: &str = "2025-01-01 00:00:00";
    const GOLDEN_GENESIS_HASH: &str =
        "7abc7881bf7b9416a119b5ff2d61012cfb256af0dc19ed6a018fee8c0f489ad7";
    const GOLDEN_FIRST_HASH: &str =
        "72281d584918b31c0fcc0b4eef5d4cebf879cd011cea31114cd40afd17e2393b";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("valid decimal")
    }

    fn record(year: i32, salary: &str, denominator: u32, cpi: &str) -> PensionRecord {
        PensionRecord::new(
            year,
            dec(salary),
            AccrualRate::one_over(denominator).expect("valid accrual"),
            dec(cpi),
        )
        .expect("valid record")
    }

    fn ledger_with(years: u32) -> Ledger {
        let mut ledger = Ledger::new(DEFAULT_EPOCH_YEAR, GENESIS_TS);
        for offset in 0..years {
            ledger.append_at(
                record(2025 + offset as i32, "50000", 49, "0.02"),
                format!("2025-01-01 00:00:{:02}", offset + 1),
            );
        }
        ledger
    }

    #[test]
    fn new_ledger_holds_only_genesis() {
        let ledger = Ledger::new(DEFAULT_EPOCH_YEAR, GENESIS_TS);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_empty());
        assert!(ledger.blocks_excluding_genesis().is_empty());

        let genesis = ledger.genesis();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.prev_hash(), GENESIS_PREV_HASH);
        assert_eq!(genesis.record().year(), 2023);
        assert!(genesis.record().salary().is_zero());
        assert!(genesis.record().calculate_unit().is_zero());
        assert!(ledger.verify().is_ok());
    }

    #[test]
    fn golden_hashes_are_stable() {
        let ledger = ledger_with(1);
        assert_eq!(ledger.genesis().compute_hash(), GOLDEN_GENESIS_HASH);
        assert_eq!(ledger.tip().prev_hash(), GOLDEN_GENESIS_HASH);
        assert_eq!(ledger.tip().compute_hash(), GOLDEN_FIRST_HASH);
    }

    #[test]
    fn salary_scale_does_not_change_hash() {
        let a = Block::new(1, record(2025, "50000", 49, "0.02"), "0", GENESIS_TS);
        let b = Block::new(1, record(2025, "50000.00", 49, "0.020"), "0", GENESIS_TS);
        assert_eq!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn append_links_to_previous_tip() {
        let mut ledger = Ledger::new(DEFAULT_EPOCH_YEAR, GENESIS_TS);
        let genesis_hash = ledger.tip_hash();
        let block = ledger.append_at(record(2025, "50000", 49, "0.02"), "2025-01-01 00:00:01");
        assert_eq!(block.index(), 1);
        assert_eq!(block.prev_hash(), genesis_hash);
        assert_eq!(ledger.len(), 2);
        assert!(!ledger.is_empty());
    }

    #[test]
    fn append_uses_clock_timestamp() {
        let clock = FixedClock("2026-10-16 09:30:00".to_string());
        let mut ledger = Ledger::with_clock(DEFAULT_EPOCH_YEAR, &clock);
        let block = ledger.append(record(2026, "42000", 57, "0.03"), &clock);
        assert_eq!(block.timestamp(), "2026-10-16 09:30:00");
        assert_eq!(ledger.genesis().timestamp(), "2026-10-16 09:30:00");
    }

    #[test]
    fn system_clock_uses_second_resolution_format() {
        let now = SystemClock.now();
        assert_eq!(now.len(), 19);
        assert_eq!(&now[4..5], "-");
        assert_eq!(&now[10..11], " ");
    }

    #[test]
    fn epoch_year_comes_from_genesis() {
        let ledger = Ledger::new(1999, GENESIS_TS);
        assert_eq!(ledger.epoch_year(), 1999);
    }

    #[test]
    fn tampered_salary_is_reported_at_the_altered_block() {
        let mut ledger = ledger_with(4);
        ledger.blocks[2].record = record(2026, "90000", 49, "0.02");

        let err = ledger.verify().expect_err("tamper must be detected");
        assert_eq!(err.diverged_at(), 2);
        assert!(matches!(err, IntegrityViolation::BrokenLink { index: 3, .. }));
        assert!(!ledger.is_valid());
    }

    #[test]
    fn tampered_timestamp_is_detected() {
        let mut ledger = ledger_with(3);
        ledger.blocks[1].timestamp = "1970-01-01 00:00:00".to_string();
        let err = ledger.verify().expect_err("tamper must be detected");
        assert_eq!(err.diverged_at(), 1);
    }

    #[test]
    fn tampered_prev_hash_is_detected() {
        let mut ledger = ledger_with(3);
        ledger.blocks[2].prev_hash = "f".repeat(64);
        let err = ledger.verify().expect_err("tamper must be detected");
        assert!(matches!(err, IntegrityViolation::BrokenLink { index: 2, .. }));
    }

    #[test]
    fn tampered_genesis_record_is_detected() {
        let mut ledger = ledger_with(2);
        ledger.blocks[0].record = PensionRecord::sentinel(2024);
        let err = ledger.verify().expect_err("tamper must be detected");
        assert_eq!(err.diverged_at(), 0);
    }

    #[test]
    fn genesis_prev_hash_must_be_sentinel() {
        let mut ledger = ledger_with(1);
        ledger.blocks[0].prev_hash = "1".to_string();
        let err = ledger.verify().expect_err("tamper must be detected");
        assert!(matches!(err, IntegrityViolation::GenesisPrevHash { .. }));
    }

    #[test]
    fn index_gap_is_detected() {
        let mut ledger = ledger_with(3);
        ledger.blocks[2].index = 5;
        let err = ledger.verify().expect_err("gap must be detected");
        assert_eq!(
            err,
            IntegrityViolation::IndexGap {
                position: 2,
                found: 5
            }
        );
    }

    #[test]
    fn removed_block_breaks_chain() {
        let mut ledger = ledger_with(3);
        ledger.blocks.remove(1);
        assert!(matches!(
            ledger.verify(),
            Err(IntegrityViolation::IndexGap { position: 1, found: 2 })
        ));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_hash_is_deterministic(
            index in 0u64..10_000,
            year in 1950i32..2100,
            salary_pence in 0i64..50_000_000,
            denominator in 1u32..200,
            cpi_bp in -500i64..1500,
            second in 0u32..60
        ) {
            let rec = PensionRecord::new(
                year,
                Decimal::new(salary_pence, 2),
                AccrualRate::one_over(denominator).expect("valid accrual"),
                Decimal::new(cpi_bp, 4),
            ).expect("valid record");
            let block = Block::new(index, rec, "ab", format!("2025-01-01 00:00:{second:02}"));
            let first = block.compute_hash();
            prop_assert_eq!(first.len(), 64);
            prop_assert_eq!(&first, &block.compute_hash());
            prop_assert_eq!(&first, &block.clone().compute_hash());
        }

        #[test]
        fn prop_sequential_appends_verify(
            salaries in proptest::collection::vec(0i64..20_000_000, 1..20)
        ) {
            let mut ledger = Ledger::new(DEFAULT_EPOCH_YEAR, GENESIS_TS);
            for (offset, pence) in salaries.iter().enumerate() {
                let before = ledger.len();
                let rec = PensionRecord::new(
                    2025 + offset as i32,
                    Decimal::new(*pence, 2),
                    AccrualRate::one_over(49).expect("valid accrual"),
                    Decimal::new(2, 2),
                ).expect("valid record");
                let index = ledger.append_at(rec, GENESIS_TS).index();
                prop_assert_eq!(ledger.len(), before + 1);
                prop_assert_eq!(index as usize, ledger.len() - 1);
            }
            prop_assert!(ledger.verify().is_ok());
            for (position, block) in ledger.blocks().iter().enumerate() {
                prop_assert_eq!(block.index() as usize, position);
            }
        }

        #[test]
        fn prop_any_non_tip_tamper_is_located(
            len in 2usize..12,
            target_seed in 0usize..1_000,
            bump in 1i64..1_000_000,
            field in 0u8..4
        ) {
            let mut ledger = ledger_with(len as u32);
            let target = 1 + target_seed % (ledger.len() - 2);
            let original = ledger.blocks[target].record.clone();
            let mut year = original.year();
            let mut salary = original.salary();
            let mut accrual = original.accrual();
            let mut cpi_index = original.cpi_index();
            match field {
                0 => year += 1 + (bump % 50) as i32,
                1 => salary += Decimal::new(bump, 2),
                2 => {
                    let denominator = accrual.denominator() + 1 + (bump % 100) as u32;
                    accrual = AccrualRate::new(accrual.numerator(), denominator)
                        .expect("valid accrual");
                }
                _ => cpi_index += Decimal::new(bump, 6),
            }
            ledger.blocks[target].record = PensionRecord::new(year, salary, accrual, cpi_index)
                .expect("valid record");
            prop_assert!(ledger.blocks[target].record != original);

            let err = ledger.verify().expect_err("tamper must be detected");
            prop_assert_eq!(err.diverged_at(), target as u64);
        }
    }
}
