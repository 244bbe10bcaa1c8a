//! Utility functions for the yieldscd pipeline.
//!
//! This module is organized into focused submodules:
//!
//! - [`validation`] - Fact quality bounds and batch checks
//! - [`conversion`] - Date/timestamp conversions and lenient JSON coercion
//! - [`pool_id`] - Legacy pool identifier cleanup

mod conversion;
mod pool_id;
mod validation;

// ============================================
// Re-exports
// ============================================

// Conversion utilities
pub use conversion::{
    from_chrono_utc, from_naive_date, parse_date, parse_timestamp, to_chrono_utc, to_naive_date,
    value_to_f64, value_to_string, value_to_string_list,
};

// Pool ID utilities
pub use pool_id::clean_pool_old;

// Validation utilities
pub use validation::{
    check_fact_quality, validate_apy, validate_usd_tvl, FactQuality, MAX_APY_PCT, MAX_TVL_USD,
    MIN_APY_PCT,
};
