use serde::{Deserialize, Serialize};

/// Descriptive and volatile attributes of a yield pool.
///
/// Everything in here is copied onto each dimension version and feeds the
/// attribute fingerprint, so a change to any field opens a new version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolAttributes {
    // Descriptive
    pub protocol_slug: String,
    pub chain: String,
    pub symbol: String,
    pub underlying_tokens: Vec<String>,
    pub reward_tokens: Vec<String>,

    // Volatile metrics at snapshot time
    pub tvl_usd: Option<f64>,
    pub apy: Option<f64>,
    pub apy_base: Option<f64>,
    pub apy_reward: Option<f64>,

    /// Legacy identifier, usually `<address>-<chain>`
    pub pool_old: Option<String>,
}

/// One row of the pool catalogue as observed at fetch time.
///
/// Population: `poolsOld` upstream endpoint, one row per pool (full snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: String,
    #[serde(flatten)]
    pub attributes: PoolAttributes,
}

impl PoolSnapshot {
    pub fn new(pool_id: impl Into<String>, attributes: PoolAttributes) -> Self {
        Self {
            pool_id: pool_id.into(),
            attributes,
        }
    }
}
