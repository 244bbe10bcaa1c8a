use thiserror::Error;
use time::Date;

/// Errors raised by the versioning and attribution core.
///
/// Attribution gaps are not errors; they are counted in `JoinStats`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScdError {
    #[error("Schema mismatch for pool '{pool_id}' in field '{field}': {reason}")]
    SchemaMismatch {
        pool_id: String,
        field: &'static str,
        reason: String,
    },
    #[error(
        "Snapshot date {snapshot_date} precedes current version of pool '{pool_id}' (valid_from {valid_from})"
    )]
    SnapshotOutOfOrder {
        pool_id: String,
        snapshot_date: Date,
        valid_from: Date,
    },
    #[error("Versioning invariant violated: {0}")]
    InvariantViolation(#[from] InvariantViolation),
}

/// A broken SCD2 invariant. Always fatal for the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("pool '{pool_id}' has {count} current versions")]
    MultipleCurrent { pool_id: String, count: usize },
    #[error("pool '{pool_id}' has no current version")]
    NoCurrent { pool_id: String },
    #[error("pool '{pool_id}' has an empty interval [{valid_from}, {valid_to})")]
    EmptyInterval {
        pool_id: String,
        valid_from: Date,
        valid_to: Date,
    },
    #[error("pool '{pool_id}' versions overlap: one ends {previous_to}, next starts {next_from}")]
    Overlap {
        pool_id: String,
        previous_to: Date,
        next_from: Date,
    },
    #[error("pool '{pool_id}' has a gap: one ends {previous_to}, next starts {next_from}")]
    Gap {
        pool_id: String,
        previous_to: Date,
        next_from: Date,
    },
    #[error("pool '{pool_id}' version from {valid_from} has is_current={is_current} but valid_to {valid_to}")]
    CurrentFlagMismatch {
        pool_id: String,
        valid_from: Date,
        valid_to: Date,
        is_current: bool,
    },
}
