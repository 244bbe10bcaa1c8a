use time::{macros::date, Date};

use crate::db::models::PoolAttributes;

/// Exclusive upper bound carried by the open (current) version of a pool.
pub const VALID_TO_SENTINEL: Date = date!(9999 - 12 - 31);

/// One SCD2 version of a pool's attributes (PostgreSQL).
///
/// Primary Key: (pool_id, valid_from)
/// Validity is the half-open interval `[valid_from, valid_to)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolVersion {
    pub pool_id: String,
    pub attributes: PoolAttributes,
    pub valid_from: Date,
    pub valid_to: Date,
    pub is_current: bool,
    pub attrib_hash: String,
    /// Soft-delete flag, always true for now
    pub is_active: bool,
}

impl PoolVersion {
    /// Open a new current version starting at `valid_from`.
    pub fn open(
        pool_id: String,
        attributes: PoolAttributes,
        attrib_hash: String,
        valid_from: Date,
    ) -> Self {
        Self {
            pool_id,
            attributes,
            valid_from,
            valid_to: VALID_TO_SENTINEL,
            is_current: true,
            attrib_hash,
            is_active: true,
        }
    }

    /// Close this version so it ends (exclusively) at `valid_to`.
    pub fn close(&mut self, valid_to: Date) {
        self.valid_to = valid_to;
        self.is_current = false;
    }

    /// True if `date` falls inside `[valid_from, valid_to)`.
    #[inline]
    pub fn covers(&self, date: Date) -> bool {
        self.valid_from <= date && date < self.valid_to
    }
}
