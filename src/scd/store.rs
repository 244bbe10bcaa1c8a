//! In-memory SCD2 dimension table.

use rustc_hash::FxHashMap;

use crate::db::models::{PoolVersion, VALID_TO_SENTINEL};
use crate::scd::error::InvariantViolation;

/// Every historical and current version of every pool.
///
/// Versions are kept ordered by `(pool_id, valid_from)`. The store is read
/// and written wholesale; there is no row-level mutation from outside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionStore {
    versions: Vec<PoolVersion>,
}

impl DimensionStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from loaded rows and check all invariants.
    pub fn from_versions(versions: Vec<PoolVersion>) -> Result<Self, InvariantViolation> {
        let store = Self::from_versions_unchecked(versions);
        store.validate()?;
        Ok(store)
    }

    pub(crate) fn from_versions_unchecked(mut versions: Vec<PoolVersion>) -> Self {
        versions.sort_by(|a, b| {
            a.pool_id
                .cmp(&b.pool_id)
                .then_with(|| a.valid_from.cmp(&b.valid_from))
        });
        Self { versions }
    }

    pub fn versions(&self) -> &[PoolVersion] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Number of distinct pools with at least one version.
    pub fn pool_count(&self) -> usize {
        self.by_pool().len()
    }

    /// All versions of one pool, ordered by `valid_from`.
    pub fn history(&self, pool_id: &str) -> &[PoolVersion] {
        let start = self.versions.partition_point(|v| v.pool_id.as_str() < pool_id);
        let end = start
            + self.versions[start..]
                .iter()
                .take_while(|v| v.pool_id == pool_id)
                .count();
        &self.versions[start..end]
    }

    /// The open version of each pool, keyed by `pool_id`.
    pub fn current_versions(&self) -> FxHashMap<&str, &PoolVersion> {
        self.versions
            .iter()
            .filter(|v| v.is_current)
            .map(|v| (v.pool_id.as_str(), v))
            .collect()
    }

    /// Versions grouped by pool, each group ordered by `valid_from`.
    pub fn by_pool(&self) -> FxHashMap<&str, &[PoolVersion]> {
        let mut index: FxHashMap<&str, &[PoolVersion]> = FxHashMap::default();
        let mut start = 0;
        while start < self.versions.len() {
            let pool_id = self.versions[start].pool_id.as_str();
            let len = self.versions[start..]
                .iter()
                .take_while(|v| v.pool_id == pool_id)
                .count();
            index.insert(pool_id, &self.versions[start..start + len]);
            start += len;
        }
        index
    }

    /// Check every SCD2 invariant:
    /// - `valid_from < valid_to` for each version
    /// - intervals of a pool are contiguous and non-overlapping
    /// - exactly one current version per pool
    /// - `is_current` iff `valid_to` is the sentinel
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        for (pool_id, history) in self.by_pool() {
            let mut current = 0;

            for v in history {
                if v.valid_from >= v.valid_to {
                    return Err(InvariantViolation::EmptyInterval {
                        pool_id: pool_id.to_string(),
                        valid_from: v.valid_from,
                        valid_to: v.valid_to,
                    });
                }
                if v.is_current != (v.valid_to == VALID_TO_SENTINEL) {
                    return Err(InvariantViolation::CurrentFlagMismatch {
                        pool_id: pool_id.to_string(),
                        valid_from: v.valid_from,
                        valid_to: v.valid_to,
                        is_current: v.is_current,
                    });
                }
                if v.is_current {
                    current += 1;
                }
            }

            if current > 1 {
                return Err(InvariantViolation::MultipleCurrent {
                    pool_id: pool_id.to_string(),
                    count: current,
                });
            }
            if current == 0 {
                return Err(InvariantViolation::NoCurrent {
                    pool_id: pool_id.to_string(),
                });
            }

            for pair in history.windows(2) {
                let (prev, next) = (&pair[0], &pair[1]);
                if prev.valid_to > next.valid_from {
                    return Err(InvariantViolation::Overlap {
                        pool_id: pool_id.to_string(),
                        previous_to: prev.valid_to,
                        next_from: next.valid_from,
                    });
                }
                if prev.valid_to < next.valid_from {
                    return Err(InvariantViolation::Gap {
                        pool_id: pool_id.to_string(),
                        previous_to: prev.valid_to,
                        next_from: next.valid_from,
                    });
                }
            }
        }

        Ok(())
    }
}
