use rust_decimal::Decimal;
use thiserror::Error;

pub type CareResult<T> = Result<T, CareError>;

/// Values rejected before they can reach the ledger or the projection engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("salary must be >= 0, got {salary}")]
    NegativeSalary { salary: Decimal },

    #[error("accrual rate must be a positive fraction, got {numerator}/{denominator}")]
    NonPositiveAccrual { numerator: u32, denominator: u32 },

    #[error("{field} must be > 0")]
    ZeroAge { field: &'static str },

    #[error("annual reduction rate must be >= 0, got {rate}")]
    NegativeReductionRate { rate: Decimal },

    #[error("{quantity} is outside the representable range")]
    OutOfRange { quantity: &'static str },

    #[error("malformed record '{raw}': {reason}")]
    MalformedRecord { raw: String, reason: String },
}

/// First point at which a ledger stops matching its own hash links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    #[error("genesis block has index {found}, expected 0")]
    GenesisIndex { found: u64 },

    #[error("genesis block links to {found:?}, expected \"0\"")]
    GenesisPrevHash { found: String },

    #[error("block at position {position} carries index {found}")]
    IndexGap { position: usize, found: u64 },

    #[error("block {index} links to {found}, but block {} hashes to {expected}", .index - 1)]
    BrokenLink {
        index: u64,
        expected: String,
        found: String,
    },
}

impl IntegrityViolation {
    /// Index of the block whose contents no longer match what was committed.
    ///
    /// A broken link at block `i` means block `i - 1` was altered after block
    /// `i` recorded its hash.
    pub fn diverged_at(&self) -> u64 {
        match self {
            IntegrityViolation::GenesisIndex { .. } | IntegrityViolation::GenesisPrevHash { .. } => 0,
            IntegrityViolation::IndexGap { position, .. } => *position as u64,
            IntegrityViolation::BrokenLink { index, .. } => index.saturating_sub(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum CareError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("ledger integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
