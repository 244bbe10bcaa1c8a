use clickhouse::Row;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::db::models::{PoolAttributes, PoolVersion, TvlPoint, VALID_TO_SENTINEL};
use crate::utils::clean_pool_old;

/// A TVL measurement enriched with the pool version valid on its date.
///
/// Output of the as-of join, handed to the warehouse uploader.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalFact {
    pub date: Date,
    pub pool_id: String,
    /// On-chain address derived from `pool_old`
    pub pool_address: Option<String>,
    pub attributes: PoolAttributes,

    // Fact metrics
    pub tvl_usd: Option<f64>,
    pub apy: Option<f64>,
    pub apy_base: Option<f64>,
    pub apy_reward: Option<f64>,

    // Matched version bookkeeping
    pub valid_from: Date,
    pub valid_to: Date,
    pub is_current: bool,
    pub attrib_hash: String,
    pub is_active: bool,
}

impl HistoricalFact {
    pub fn attribute(fact: &TvlPoint, version: &PoolVersion) -> Self {
        Self {
            date: fact.date(),
            pool_id: fact.pool_id.clone(),
            pool_address: version.attributes.pool_old.as_deref().map(clean_pool_old),
            attributes: version.attributes.clone(),
            tvl_usd: fact.tvl_usd,
            apy: fact.apy,
            apy_base: fact.apy_base,
            apy_reward: fact.apy_reward,
            valid_from: version.valid_from,
            valid_to: version.valid_to,
            is_current: version.is_current,
            attrib_hash: version.attrib_hash.clone(),
            is_active: version.is_active,
        }
    }
}

/// Warehouse row for `pool_historical_facts` (ClickHouse).
///
/// Query Patterns:
///   - "TVL history for pool X with the symbol/chain valid at the time"
///   - "Rows already loaded for date D" (duplicate check)
///
/// `valid_to` is NULL for the open version: the sentinel date does not fit
/// ClickHouse's `Date` range.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct HistoricalFactRow {
    #[serde(with = "clickhouse::serde::time::date")]
    pub date: Date,
    pub pool_id: String,
    pub pool_address: Option<String>,
    pub protocol_slug: String,
    pub chain: String,
    pub symbol: String,
    pub underlying_tokens: Vec<String>,
    pub reward_tokens: Vec<String>,
    pub pool_old: Option<String>,

    pub tvl_usd: Option<f64>,
    pub apy: Option<f64>,
    pub apy_base: Option<f64>,
    pub apy_reward: Option<f64>,

    #[serde(with = "clickhouse::serde::time::date")]
    pub valid_from: Date,
    #[serde(with = "clickhouse::serde::time::date::option")]
    pub valid_to: Option<Date>,
    pub is_current: bool,
    pub attrib_hash: String,
    pub is_active: bool,
}

impl From<&HistoricalFact> for HistoricalFactRow {
    fn from(fact: &HistoricalFact) -> Self {
        let attrs = &fact.attributes;
        Self {
            date: fact.date,
            pool_id: fact.pool_id.clone(),
            pool_address: fact.pool_address.clone(),
            protocol_slug: attrs.protocol_slug.clone(),
            chain: attrs.chain.clone(),
            symbol: attrs.symbol.clone(),
            underlying_tokens: attrs.underlying_tokens.clone(),
            reward_tokens: attrs.reward_tokens.clone(),
            pool_old: attrs.pool_old.clone(),
            tvl_usd: fact.tvl_usd,
            apy: fact.apy,
            apy_base: fact.apy_base,
            apy_reward: fact.apy_reward,
            valid_from: fact.valid_from,
            valid_to: (fact.valid_to != VALID_TO_SENTINEL).then_some(fact.valid_to),
            is_current: fact.is_current,
            attrib_hash: fact.attrib_hash.clone(),
            is_active: fact.is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn version(valid_to: Date) -> PoolVersion {
        let mut v = PoolVersion::open(
            "p1".to_string(),
            PoolAttributes {
                protocol_slug: "uniswap-v3".to_string(),
                chain: "Ethereum".to_string(),
                symbol: "WETH-USDC".to_string(),
                pool_old: Some("0xabc-ethereum".to_string()),
                ..Default::default()
            },
            "h1".to_string(),
            date!(2024 - 01 - 01),
        );
        if valid_to != VALID_TO_SENTINEL {
            v.close(valid_to);
        }
        v
    }

    fn point() -> TvlPoint {
        TvlPoint {
            pool_id: "p1".to_string(),
            timestamp: datetime!(2024-03-05 23:01:37 UTC),
            tvl_usd: Some(1_000.0),
            apy: Some(4.2),
            apy_base: None,
            apy_reward: None,
        }
    }

    #[test]
    fn test_attribute_copies_version_bookkeeping() {
        let fact = HistoricalFact::attribute(&point(), &version(VALID_TO_SENTINEL));

        assert_eq!(fact.date, date!(2024 - 03 - 05));
        assert_eq!(fact.pool_address.as_deref(), Some("0xabc"));
        assert_eq!(fact.attrib_hash, "h1");
        assert!(fact.is_current);
        assert_eq!(fact.tvl_usd, Some(1_000.0));
    }

    #[test]
    fn test_row_maps_sentinel_to_null() {
        let open = HistoricalFact::attribute(&point(), &version(VALID_TO_SENTINEL));
        assert_eq!(HistoricalFactRow::from(&open).valid_to, None);

        let closed = HistoricalFact::attribute(&point(), &version(date!(2024 - 06 - 01)));
        assert_eq!(
            HistoricalFactRow::from(&closed).valid_to,
            Some(date!(2024 - 06 - 01))
        );
    }
}
