//! Data-quality checks for attributed facts.
//!
//! None of these are fatal. They exist to surface upstream glitches in the
//! logs before rows reach the warehouse:
//!
//! 1. TVL: negative values are impossible, and a single pool holding more than
//!    $100B is a unit/decimal error upstream.
//!
//! 2. APY: yields outside [-100%, 1000%] are almost always reward-token price
//!    spikes on tiny pools.
//!
//! 3. KEYS: a `(date, pool_id)` pair must appear once per table.

use log::warn;
use rustc_hash::FxHashSet;

use crate::db::models::HistoricalFact;

// ============================================
// Fact Validation Constants
// ============================================

/// Maximum reasonable TVL in USD for a single pool.
/// $100 billion covers the largest DeFi pools with margin.
pub const MAX_TVL_USD: f64 = 1e11;

/// Lowest plausible APY, in percent. A position cannot lose more than all of it.
pub const MIN_APY_PCT: f64 = -100.0;

/// Highest plausible APY, in percent.
pub const MAX_APY_PCT: f64 = 1_000.0;

// ============================================
// Fact Validation Helpers
// ============================================

/// Validate a USD TVL is within reasonable bounds.
/// Returns Some(tvl) if valid, None if invalid.
#[inline]
pub fn validate_usd_tvl(tvl: f64) -> Option<f64> {
    if tvl >= 0.0 && tvl.is_finite() && tvl <= MAX_TVL_USD {
        Some(tvl)
    } else {
        None
    }
}

/// Validate an APY (percent) is within reasonable bounds.
#[inline]
pub fn validate_apy(apy: f64) -> Option<f64> {
    if apy.is_finite() && (MIN_APY_PCT..=MAX_APY_PCT).contains(&apy) {
        Some(apy)
    } else {
        None
    }
}

/// Quality counters for one batch of attributed facts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactQuality {
    pub rows: usize,
    pub negative_tvl: usize,
    pub excessive_tvl: usize,
    pub extreme_apy: usize,
    /// Rows sharing a `(date, pool_id)` with an earlier row
    pub duplicate_keys: usize,
    /// Facts dropped by the join for lack of a dimension version
    pub orphaned_facts: usize,
}

impl FactQuality {
    pub fn is_clean(&self) -> bool {
        self.negative_tvl == 0
            && self.excessive_tvl == 0
            && self.extreme_apy == 0
            && self.duplicate_keys == 0
            && self.orphaned_facts == 0
    }
}

/// Count quality issues in `facts` and log a warning for each kind found.
pub fn check_fact_quality(facts: &[HistoricalFact], orphaned_facts: usize) -> FactQuality {
    let mut quality = FactQuality {
        rows: facts.len(),
        orphaned_facts,
        ..Default::default()
    };

    let mut keys = FxHashSet::default();
    for fact in facts {
        if let Some(tvl) = fact.tvl_usd {
            if tvl < 0.0 {
                quality.negative_tvl += 1;
            } else if validate_usd_tvl(tvl).is_none() {
                quality.excessive_tvl += 1;
            }
        }
        if fact.apy.is_some_and(|apy| validate_apy(apy).is_none()) {
            quality.extreme_apy += 1;
        }
        if !keys.insert((fact.date, fact.pool_id.as_str())) {
            quality.duplicate_keys += 1;
        }
    }

    if quality.negative_tvl > 0 {
        warn!("Found {} records with negative TVL values", quality.negative_tvl);
    }
    if quality.excessive_tvl > 0 {
        warn!(
            "Found {} records with TVL above ${:e}",
            quality.excessive_tvl, MAX_TVL_USD
        );
    }
    if quality.extreme_apy > 0 {
        warn!("Found {} records with extreme APY values", quality.extreme_apy);
    }
    if quality.duplicate_keys > 0 {
        warn!(
            "Duplicate records found for (date, pool_id): {}",
            quality.duplicate_keys
        );
    }
    if quality.orphaned_facts > 0 {
        warn!("Found {} orphaned fact records", quality.orphaned_facts);
    }

    quality
}
