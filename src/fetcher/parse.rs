//! Upstream response parsing.
//!
//! Key columns (`pool`, `timestamp`) must be present and well formed or the
//! whole response is rejected. Everything else is coerced best-effort and
//! logged when it cannot be.

use log::warn;
use serde_json::{Map, Value};

use crate::db::models::{PoolAttributes, PoolSnapshot, TvlPoint};
use crate::scd::ScdError;
use crate::utils::{parse_timestamp, value_to_f64, value_to_string, value_to_string_list};

/// Unwrap `{"status": "success", "data": [...]}`.
pub fn response_data(body: &Value) -> anyhow::Result<&Vec<Value>> {
    if let Some(status) = body.get("status").and_then(Value::as_str) {
        if status != "success" {
            anyhow::bail!("Upstream returned status '{}'", status);
        }
    }

    body.get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("Upstream response has no 'data' array"))
}

/// Parse the `poolsOld` payload into one snapshot row per pool.
pub fn parse_pools(data: &[Value]) -> Result<Vec<PoolSnapshot>, ScdError> {
    data.iter().map(parse_pool).collect()
}

fn parse_pool(raw: &Value) -> Result<PoolSnapshot, ScdError> {
    let obj = as_object(raw, "<unknown>")?;

    let pool_id = obj
        .get("pool")
        .and_then(value_to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ScdError::SchemaMismatch {
            pool_id: "<unknown>".to_string(),
            field: "pool",
            reason: "missing pool identifier".to_string(),
        })?;

    let attributes = PoolAttributes {
        protocol_slug: text(obj, &pool_id, "project"),
        chain: text(obj, &pool_id, "chain"),
        symbol: text(obj, &pool_id, "symbol"),
        underlying_tokens: obj
            .get("underlyingTokens")
            .map(value_to_string_list)
            .unwrap_or_default(),
        reward_tokens: obj
            .get("rewardTokens")
            .map(value_to_string_list)
            .unwrap_or_default(),
        tvl_usd: number(obj, &pool_id, "tvlUsd"),
        apy: number(obj, &pool_id, "apy"),
        apy_base: number(obj, &pool_id, "apyBase"),
        apy_reward: number(obj, &pool_id, "apyReward"),
        pool_old: obj
            .get("pool_old")
            .and_then(value_to_string)
            .filter(|s| !s.is_empty()),
    };

    Ok(PoolSnapshot::new(pool_id, attributes))
}

/// Parse a `chart/{pool}` payload into TVL points for `pool_id`.
pub fn parse_chart(pool_id: &str, data: &[Value]) -> Result<Vec<TvlPoint>, ScdError> {
    data.iter()
        .map(|raw| {
            let obj = as_object(raw, pool_id)?;

            let raw_ts = obj.get("timestamp").and_then(Value::as_str).ok_or_else(|| {
                ScdError::SchemaMismatch {
                    pool_id: pool_id.to_string(),
                    field: "timestamp",
                    reason: "missing timestamp".to_string(),
                }
            })?;
            let timestamp = parse_timestamp(raw_ts).map_err(|e| ScdError::SchemaMismatch {
                pool_id: pool_id.to_string(),
                field: "timestamp",
                reason: e.to_string(),
            })?;

            Ok(TvlPoint {
                pool_id: pool_id.to_string(),
                timestamp,
                tvl_usd: number(obj, pool_id, "tvlUsd"),
                apy: number(obj, pool_id, "apy"),
                apy_base: number(obj, pool_id, "apyBase"),
                apy_reward: number(obj, pool_id, "apyReward"),
            })
        })
        .collect()
}

fn as_object<'a>(raw: &'a Value, pool_id: &str) -> Result<&'a Map<String, Value>, ScdError> {
    raw.as_object().ok_or_else(|| ScdError::SchemaMismatch {
        pool_id: pool_id.to_string(),
        field: "<row>",
        reason: format!("expected object, got {}", raw),
    })
}

fn text(obj: &Map<String, Value>, pool_id: &str, field: &str) -> String {
    match obj.get(field).and_then(value_to_string) {
        Some(s) => s,
        None => {
            warn!("Pool {}: missing '{}', using empty string", pool_id, field);
            String::new()
        },
    }
}

fn number(obj: &Map<String, Value>, pool_id: &str, field: &str) -> Option<f64> {
    let value = obj.get(field)?;
    match value_to_f64(value) {
        Ok(v) => v,
        Err(e) => {
            warn!("Pool {}: field '{}' coerced to null ({})", pool_id, field, e);
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    #[test]
    fn test_parse_pools_payload() {
        let body = json!({
            "status": "success",
            "data": [{
                "pool": "747c1d2a-c668-4682-b9f9-296708a3dd90",
                "project": "lido",
                "chain": "Ethereum",
                "symbol": "STETH",
                "underlyingTokens": ["0x0000000000000000000000000000000000000000", null],
                "rewardTokens": null,
                "tvlUsd": 24069874829i64,
                "apy": "3.1",
                "apyBase": 3.1,
                "apyReward": null,
                "pool_old": "0xae7ab96520de3a18e5e111b5eaab095312d7fe84-ethereum",
                "timestamp": "2024-06-01T23:01:37.146Z"
            }]
        });

        let pools = parse_pools(response_data(&body).unwrap()).unwrap();
        assert_eq!(pools.len(), 1);

        let p = &pools[0];
        assert_eq!(p.pool_id, "747c1d2a-c668-4682-b9f9-296708a3dd90");
        assert_eq!(p.attributes.protocol_slug, "lido");
        assert_eq!(p.attributes.underlying_tokens.len(), 1);
        assert!(p.attributes.reward_tokens.is_empty());
        assert_eq!(p.attributes.tvl_usd, Some(24_069_874_829.0));
        assert_eq!(p.attributes.apy, Some(3.1));
        assert_eq!(p.attributes.apy_reward, None);
    }

    #[test]
    fn test_missing_pool_id_is_fatal() {
        let data = vec![json!({"project": "lido", "chain": "Ethereum", "symbol": "STETH"})];
        let err = parse_pools(&data).unwrap_err();
        assert!(matches!(err, ScdError::SchemaMismatch { field: "pool", .. }));
    }

    #[test]
    fn test_bad_metric_is_coerced_not_fatal() {
        let data = vec![json!({"pool": "p1", "project": "x", "chain": "y", "symbol": "z", "tvlUsd": "n/a"})];
        let pools = parse_pools(&data).unwrap();
        assert_eq!(pools[0].attributes.tvl_usd, None);
    }

    #[test]
    fn test_parse_chart_payload() {
        let data = vec![
            json!({"timestamp": "2024-05-31T23:01:37.146Z", "tvlUsd": 100, "apy": 1.5, "apyBase": null, "apyReward": null}),
            json!({"timestamp": "2024-06-01T00:00:00.000Z", "tvlUsd": 110, "apy": 1.4}),
        ];

        let points = parse_chart("p1", &data).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date(), date!(2024 - 05 - 31));
        assert_eq!(points[1].date(), date!(2024 - 06 - 01));
        assert_eq!(points[1].tvl_usd, Some(110.0));
        assert_eq!(points[1].apy_base, None);
    }

    #[test]
    fn test_bad_timestamp_is_fatal() {
        let data = vec![json!({"timestamp": "not-a-date", "tvlUsd": 1})];
        let err = parse_chart("p1", &data).unwrap_err();
        assert!(matches!(err, ScdError::SchemaMismatch { field: "timestamp", .. }));
    }

    #[test]
    fn test_error_status_rejected() {
        let body = json!({"status": "error", "data": []});
        assert!(response_data(&body).is_err());
    }
}
