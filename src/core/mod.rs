mod digest;
mod engine;
mod error;
mod ledger;
mod types;

pub use digest::{BLOCK_ENCODING_TAG, CanonicalEncoder, canonical_decimal, sha256_hex};
pub use engine::{accrued_total, project, project_total};
pub use error::{CareError, CareResult, IntegrityViolation, InvalidInput};
pub use ledger::{
    Block, Clock, DEFAULT_EPOCH_YEAR, FixedClock, GENESIS_PREV_HASH, Ledger, SystemClock,
};
pub use types::{
    AccrualRate, PensionRecord, ProjectionResult, ReductionPolicy, RetirementParams, StatusKind,
};
