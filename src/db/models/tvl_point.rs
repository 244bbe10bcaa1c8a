use time::{Date, OffsetDateTime, UtcOffset};

/// Point-in-time TVL/APY measurement for a pool.
///
/// Population: `chart/{pool}` upstream endpoint. Immutable, append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct TvlPoint {
    pub pool_id: String,
    pub timestamp: OffsetDateTime,
    pub tvl_usd: Option<f64>,
    pub apy: Option<f64>,
    pub apy_base: Option<f64>,
    pub apy_reward: Option<f64>,
}

impl TvlPoint {
    /// Observation date in UTC, the key used for attribution.
    #[inline]
    pub fn date(&self) -> Date {
        self.timestamp.to_offset(UtcOffset::UTC).date()
    }
}
