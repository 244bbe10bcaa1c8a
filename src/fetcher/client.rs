use std::time::Duration;

use anyhow::Context;
use futures::{stream, StreamExt};
use log::{error, info, warn};
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use crate::{
    config::UpstreamSettings,
    db::models::{PoolSnapshot, TvlPoint},
    fetcher::parse::{parse_chart, parse_pools, response_data},
    scd::ScdError,
};

/// Result of fetching charts for many pools.
#[derive(Debug, Default)]
pub struct ChartFetch {
    pub points: Vec<TvlPoint>,
    /// Pools whose chart could not be fetched after retries
    pub failed: Vec<String>,
}

/// HTTP client for the upstream yields API.
///
/// Retries transport errors, 429 and 5xx with exponential backoff. Per-pool
/// chart requests run with bounded concurrency.
#[derive(Clone)]
pub struct YieldsClient {
    http: reqwest::Client,
    base_url: Url,
    settings: UpstreamSettings,
}

impl YieldsClient {
    pub fn new(settings: UpstreamSettings) -> anyhow::Result<Self> {
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).with_context(|| format!("Invalid upstream base_url: {}", base))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("yieldscd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            settings,
        })
    }

    /// Fetch the full pool catalogue snapshot.
    pub async fn fetch_pools(&self) -> anyhow::Result<Vec<PoolSnapshot>> {
        let url = self.base_url.join("poolsOld")?;
        let body = self.get_json(&url).await?;
        let pools = parse_pools(response_data(&body)?)?;
        info!("Fetched {} pools from {}", pools.len(), url);
        Ok(pools)
    }

    /// Fetch the full TVL/APY history of one pool.
    pub async fn fetch_chart(&self, pool_id: &str) -> anyhow::Result<Vec<TvlPoint>> {
        let url = self.base_url.join(&format!("chart/{}", pool_id))?;
        let body = self.get_json(&url).await?;
        Ok(parse_chart(pool_id, response_data(&body)?)?)
    }

    /// Fetch charts for many pools.
    ///
    /// Transport failures skip the pool and are reported in `failed`.
    /// Malformed key columns abort the whole fetch.
    pub async fn fetch_charts(&self, pool_ids: &[String]) -> anyhow::Result<ChartFetch> {
        let total = pool_ids.len();
        let start = std::time::Instant::now();

        let results: Vec<(String, anyhow::Result<Vec<TvlPoint>>)> = stream::iter(pool_ids.iter().cloned())
            .map(|pool_id| async move {
                let result = self.fetch_chart(&pool_id).await;
                (pool_id, result)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let fetch = collect_chart_results(results)?;

        if !fetch.failed.is_empty() {
            warn!(
                "Failed to fetch TVL for {}/{} pools: {:?}",
                fetch.failed.len(),
                total,
                fetch.failed
            );
        }
        info!(
            "Fetched {} TVL points for {} pools in {:?}",
            fetch.points.len(),
            total - fetch.failed.len(),
            start.elapsed()
        );

        Ok(fetch)
    }

    async fn get_json(&self, url: &Url) -> anyhow::Result<Value> {
        let max_retries = self.settings.max_retries;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error_msg = match self.http.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let bytes = resp
                        .bytes()
                        .await
                        .with_context(|| format!("Failed to read body from {}", url))?;
                    return serde_json::from_slice(&bytes)
                        .with_context(|| format!("Invalid JSON from {}", url));
                },
                Ok(resp) if is_retryable(resp.status()) => format!("HTTP {}", resp.status()),
                Ok(resp) => {
                    anyhow::bail!("GET {} failed with HTTP {}", url, resp.status());
                },
                Err(e) => e.to_string(),
            };

            if attempt > max_retries {
                anyhow::bail!(
                    "GET {} failed after {} attempts: {}",
                    url,
                    attempt,
                    error_msg
                );
            }

            let delay = backoff_delay(self.settings.backoff_base_ms, attempt);
            warn!(
                "GET {} failed (attempt {}/{}), retrying in {:?}... Error: {}",
                url,
                attempt,
                max_retries.saturating_add(1),
                delay,
                error_msg
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Merge per-pool chart results.
///
/// A malformed chart (`ScdError`) aborts the whole fetch. Any other error
/// skips that pool and records it in `failed`.
fn collect_chart_results(
    results: Vec<(String, anyhow::Result<Vec<TvlPoint>>)>,
) -> anyhow::Result<ChartFetch> {
    let mut fetch = ChartFetch::default();
    for (pool_id, result) in results {
        match result {
            Ok(points) => fetch.points.extend(points),
            Err(e) if e.downcast_ref::<ScdError>().is_some() => {
                return Err(e.context(format!("Malformed chart for pool {}", pool_id)));
            },
            Err(e) => {
                error!("Error fetching chart for pool {}: {:#}", pool_id, e);
                fetch.failed.push(pool_id);
            },
        }
    }
    Ok(fetch)
}

/// Delay before retry `attempt` (1-based): `base_ms * 2^(attempt - 1)`,
/// capped at `MAX_BACKOFF`.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    const MAX_BACKOFF: Duration = Duration::from_secs(300);

    let factor = 2_u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }

    fn point(pool_id: &str) -> TvlPoint {
        TvlPoint {
            pool_id: pool_id.to_string(),
            timestamp: time::macros::datetime!(2024-07-10 23:01 UTC),
            tvl_usd: Some(1.0),
            apy: None,
            apy_base: None,
            apy_reward: None,
        }
    }

    #[test]
    fn test_transport_failure_skips_pool() {
        let results = vec![
            ("p1".to_string(), Ok(vec![point("p1"), point("p1")])),
            (
                "p2".to_string(),
                Err(anyhow::anyhow!("GET chart/p2 failed after 4 attempts: HTTP 503")),
            ),
            ("p3".to_string(), Ok(vec![point("p3")])),
        ];

        let fetch = collect_chart_results(results).unwrap();
        assert_eq!(fetch.points.len(), 3);
        assert_eq!(fetch.failed, vec!["p2".to_string()]);
    }

    #[test]
    fn test_malformed_chart_aborts_fetch() {
        let malformed: anyhow::Error = ScdError::SchemaMismatch {
            pool_id: "p2".to_string(),
            field: "timestamp",
            reason: "missing timestamp".to_string(),
        }
        .into();
        let results = vec![
            ("p1".to_string(), Ok(vec![point("p1")])),
            ("p2".to_string(), Err(malformed)),
            ("p3".to_string(), Err(anyhow::anyhow!("connection reset"))),
        ];

        let err = collect_chart_results(results).unwrap_err();
        assert!(err.downcast_ref::<ScdError>().is_some());
        assert!(format!("{:#}", err).contains("Malformed chart for pool p2"));
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(500, 4), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(500, 20), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_large_attempts_do_not_overflow() {
        assert_eq!(backoff_delay(500, 64), Duration::from_secs(300));
        assert_eq!(backoff_delay(500, 65), Duration::from_secs(300));
        assert_eq!(backoff_delay(u64::MAX, u32::MAX), Duration::from_secs(300));
        assert_eq!(backoff_delay(0, 100), Duration::ZERO);
    }

    #[test]
    fn test_base_url_joins_endpoints() {
        let client = YieldsClient::new(UpstreamSettings {
            base_url: "https://yields.llama.fi".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            client.base_url.join("chart/abc").unwrap().as_str(),
            "https://yields.llama.fi/chart/abc"
        );
    }
}
