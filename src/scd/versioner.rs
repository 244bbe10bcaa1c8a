//! SCD2 versioning: advance the dimension store by one full snapshot.
//!
//! New versions always start at the snapshot date. A pool never has a version
//! before the day it was first observed, so facts recorded before that day
//! stay unattributed instead of being pinned to attributes nobody saw yet.

use log::debug;
use rustc_hash::FxHashSet;
use time::Date;

use crate::db::models::{PoolSnapshot, PoolVersion};
use crate::scd::{attribute_hash, DimensionStore, ScdError};

/// Counters describing what one `advance` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersioningStats {
    /// Versions opened (new pools + changed pools)
    pub opened: usize,
    /// Previous current versions closed at the snapshot date
    pub closed: usize,
    /// Pools whose fingerprint matched their current version
    pub unchanged: usize,
    /// Pools seen for the first time
    pub new_pools: usize,
    /// Same-day versions replaced instead of closed
    pub replaced_same_day: usize,
    /// Pools in the store but absent from the snapshot (left open)
    pub untouched_absent: usize,
}

/// Result of advancing the store.
#[derive(Debug, Clone)]
pub struct Advance {
    pub store: DimensionStore,
    pub stats: VersioningStats,
}

/// Produce the next-generation store from a full snapshot.
///
/// # Arguments
/// * `current` - Store from the previous run (may be empty)
/// * `snapshot` - One row per currently observed pool
/// * `snapshot_date` - Date stamped on newly opened versions
///
/// # Errors
/// * `SchemaMismatch` - empty or duplicate `pool_id` in the snapshot
/// * `SnapshotOutOfOrder` - a changed pool's current version starts after `snapshot_date`
/// * `InvariantViolation` - the resulting store breaks an SCD2 invariant
pub fn advance(
    current: &DimensionStore,
    snapshot: &[PoolSnapshot],
    snapshot_date: Date,
) -> Result<Advance, ScdError> {
    let mut stats = VersioningStats::default();

    // Step 1: fingerprint every observed pool, rejecting bad keys
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut hashed = Vec::with_capacity(snapshot.len());
    for pool in snapshot {
        if pool.pool_id.trim().is_empty() {
            return Err(ScdError::SchemaMismatch {
                pool_id: pool.pool_id.clone(),
                field: "pool_id",
                reason: "empty pool identifier".to_string(),
            });
        }
        if !seen.insert(pool.pool_id.as_str()) {
            return Err(ScdError::SchemaMismatch {
                pool_id: pool.pool_id.clone(),
                field: "pool_id",
                reason: "duplicate pool in full snapshot".to_string(),
            });
        }
        hashed.push((pool, attribute_hash(&pool.attributes)));
    }

    // Step 2: partition into changed/new vs unchanged
    let current_versions = current.current_versions();
    let mut changed: FxHashSet<&str> = FxHashSet::default();
    let mut to_open = Vec::new();

    for (pool, hash) in hashed {
        match current_versions.get(pool.pool_id.as_str()) {
            Some(existing) if existing.attrib_hash == hash => {
                stats.unchanged += 1;
            },
            Some(existing) => {
                if snapshot_date < existing.valid_from {
                    return Err(ScdError::SnapshotOutOfOrder {
                        pool_id: pool.pool_id.clone(),
                        snapshot_date,
                        valid_from: existing.valid_from,
                    });
                }
                changed.insert(pool.pool_id.as_str());
                to_open.push((pool, hash));
            },
            None => {
                stats.new_pools += 1;
                to_open.push((pool, hash));
            },
        }
    }

    stats.untouched_absent = current_versions
        .keys()
        .filter(|pool_id| !seen.contains(*pool_id))
        .count();

    // Step 3: close current versions of changed pools, pass everything else through
    let mut versions = Vec::with_capacity(current.len() + to_open.len());
    for version in current.versions() {
        let is_changed_current =
            version.is_current && changed.contains(version.pool_id.as_str());
        if !is_changed_current {
            versions.push(version.clone());
            continue;
        }

        if version.valid_from == snapshot_date {
            // Opened earlier today: it has no history of its own, drop it
            debug!(
                "Replacing same-day version of pool {} ({})",
                version.pool_id, snapshot_date
            );
            stats.replaced_same_day += 1;
            continue;
        }

        let mut closed = version.clone();
        closed.close(snapshot_date);
        stats.closed += 1;
        versions.push(closed);
    }

    // Step 4: open a version for every changed or new pool
    for (pool, hash) in to_open {
        versions.push(PoolVersion::open(
            pool.pool_id.clone(),
            pool.attributes.clone(),
            hash,
            snapshot_date,
        ));
        stats.opened += 1;
    }

    // Step 5: union, order and verify
    let store = DimensionStore::from_versions_unchecked(versions);
    store.validate()?;

    Ok(Advance { store, stats })
}
