//! Temporal dimension versioning and fact attribution.
//!
//! - [`hasher`] - Attribute fingerprints for change detection
//! - [`store`] - In-memory SCD2 table and invariant checks
//! - [`versioner`] - Advance the store by one full snapshot
//! - [`join`] - As-of join of facts against the store
//! - [`builder`] - Full vs incremental fact building
//!
//! Everything here is synchronous and deterministic. Dates are always passed
//! in; nothing reads the wall clock.

mod builder;
mod error;
mod hasher;
mod join;
mod store;
mod versioner;

pub use builder::{
    needs_probe, select_mode, DestinationStatus, FactBatch, FactBuilder, LoadState, ModeDecision,
    ModeReason, RequestedMode, RunMode,
};
pub use error::{InvariantViolation, ScdError};
pub use hasher::attribute_hash;
pub use join::{join, version_at, JoinOutput, JoinStats};
pub use store::DimensionStore;
pub use versioner::{advance, Advance, VersioningStats};
