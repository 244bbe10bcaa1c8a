use anyhow::Context;
use log::{error, info};
use tokio_postgres::types::ToSql;

use crate::db::models::{PoolAttributes, PoolVersion};
use crate::db::postgres::PostgresClient;
use crate::scd::DimensionStore;
use crate::utils::{from_chrono_utc, from_naive_date, to_chrono_utc, to_naive_date};

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

fn sanitize_list(items: &[String]) -> Vec<String> {
    items.iter().map(|s| sanitize_string(s)).collect()
}

/// Owned, sanitized column values for one `pool_versions` row.
struct VersionParams {
    pool_id: String,
    protocol_slug: String,
    chain: String,
    symbol: String,
    underlying_tokens: Vec<String>,
    reward_tokens: Vec<String>,
    pool_old: Option<String>,
    valid_from: chrono::NaiveDate,
    valid_to: chrono::NaiveDate,
}

impl VersionParams {
    fn new(v: &PoolVersion) -> Self {
        let attrs = &v.attributes;
        Self {
            pool_id: sanitize_string(&v.pool_id),
            protocol_slug: sanitize_string(&attrs.protocol_slug),
            chain: sanitize_string(&attrs.chain),
            symbol: sanitize_string(&attrs.symbol),
            underlying_tokens: sanitize_list(&attrs.underlying_tokens),
            reward_tokens: sanitize_list(&attrs.reward_tokens),
            pool_old: attrs.pool_old.as_deref().map(sanitize_string),
            valid_from: to_naive_date(v.valid_from),
            valid_to: to_naive_date(v.valid_to),
        }
    }
}

impl PostgresClient {
    // ==================== POOL DIMENSION ====================

    /// Load every pool version and validate the SCD2 invariants.
    pub async fn load_dimension_store(&self) -> anyhow::Result<DimensionStore> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                pool_id, protocol_slug, chain, symbol, underlying_tokens, reward_tokens,
                tvl_usd, apy, apy_base, apy_reward, pool_old,
                valid_from, valid_to, is_current, attrib_hash, is_active
            FROM scd.pool_versions
            ORDER BY pool_id, valid_from
        "#;

        let rows = client.query(query, &[]).await?;
        let versions = rows
            .iter()
            .map(row_to_pool_version)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let store = DimensionStore::from_versions(versions)
            .context("Stored pool dimension violates SCD2 invariants")?;

        info!(
            "[DIM] Loaded {} versions for {} pools",
            store.len(),
            store.pool_count()
        );
        Ok(store)
    }

    /// Replace the stored dimension with `store` in one transaction.
    ///
    /// Readers see either the previous dimension or the new one.
    pub async fn save_dimension_store(&self, store: &DimensionStore) -> anyhow::Result<()> {
        const COLS_PER_ROW: usize = 16;
        const BATCH_SIZE: usize = 1000;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.execute("DELETE FROM scd.pool_versions", &[]).await?;

        for chunk in store.versions().chunks(BATCH_SIZE) {
            // Build VALUES placeholders: ($1,...,$16), ($17,...,$32), ...
            let values_clauses: Vec<String> = (0..chunk.len())
                .map(|i| {
                    let start = i * COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = (start..start + COLS_PER_ROW)
                        .map(|n| format!("${}", n))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO scd.pool_versions (
                    pool_id, protocol_slug, chain, symbol, underlying_tokens, reward_tokens,
                    tvl_usd, apy, apy_base, apy_reward, pool_old,
                    valid_from, valid_to, is_current, attrib_hash, is_active
                ) VALUES {}
                "#,
                values_clauses.join(", ")
            );

            let owned: Vec<VersionParams> = chunk.iter().map(VersionParams::new).collect();

            let mut params: Vec<&(dyn ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * COLS_PER_ROW);

            for (v, p) in chunk.iter().zip(&owned) {
                params.push(&p.pool_id);
                params.push(&p.protocol_slug);
                params.push(&p.chain);
                params.push(&p.symbol);
                params.push(&p.underlying_tokens);
                params.push(&p.reward_tokens);
                params.push(&v.attributes.tvl_usd);
                params.push(&v.attributes.apy);
                params.push(&v.attributes.apy_base);
                params.push(&v.attributes.apy_reward);
                params.push(&p.pool_old);
                params.push(&p.valid_from);
                params.push(&p.valid_to);
                params.push(&v.is_current);
                params.push(&v.attrib_hash);
                params.push(&v.is_active);
            }

            tx.execute(&query, &params).await.map_err(|e| {
                error!("Failed to insert batch of {} pool versions: {:?}", chunk.len(), e);
                e
            })?;
        }

        tx.commit().await.context("Failed to commit pool dimension")?;

        info!(
            "[DIM] Saved {} versions for {} pools",
            store.len(),
            store.pool_count()
        );
        Ok(())
    }

    // ==================== CHECKPOINTS ====================

    /// Get last run timestamp for a job
    pub async fn get_cron_checkpoint(
        &self,
        job_name: &str,
    ) -> anyhow::Result<Option<time::OffsetDateTime>> {
        let client = self.pool.get().await?;
        let query = "SELECT last_run_at FROM scd.cron_checkpoints WHERE job_name = $1";

        let row = client.query_opt(query, &[&job_name]).await?;

        match row.and_then(|r| r.get::<_, Option<chrono::DateTime<chrono::Utc>>>("last_run_at")) {
            Some(last_run) => Ok(Some(from_chrono_utc(last_run)?)),
            None => Ok(None),
        }
    }

    /// Set last run timestamp for a job
    pub async fn set_cron_checkpoint(
        &self,
        job_name: &str,
        last_run_at: time::OffsetDateTime,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO scd.cron_checkpoints (job_name, last_run_at, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (job_name) DO UPDATE SET
                last_run_at = EXCLUDED.last_run_at,
                updated_at = NOW()
        "#;

        let last_run_chrono = to_chrono_utc(last_run_at);

        client
            .execute(query, &[&job_name, &last_run_chrono])
            .await
            .map_err(|e| {
                error!("Failed to update checkpoint for job {}: {:?}", job_name, e);
                e
            })?;

        Ok(())
    }

    /// Remove a checkpoint so the job starts from scratch.
    pub async fn clear_cron_checkpoint(&self, job_name: &str) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM scd.cron_checkpoints WHERE job_name = $1",
                &[&job_name],
            )
            .await?;
        Ok(())
    }
}

// ==================== HELPER FUNCTIONS ====================

fn row_to_pool_version(row: &tokio_postgres::Row) -> anyhow::Result<PoolVersion> {
    let valid_from: chrono::NaiveDate = row.get("valid_from");
    let valid_to: chrono::NaiveDate = row.get("valid_to");

    Ok(PoolVersion {
        pool_id: row.get("pool_id"),
        attributes: PoolAttributes {
            protocol_slug: row.get("protocol_slug"),
            chain: row.get("chain"),
            symbol: row.get("symbol"),
            underlying_tokens: row.get("underlying_tokens"),
            reward_tokens: row.get("reward_tokens"),
            tvl_usd: row.get("tvl_usd"),
            apy: row.get("apy"),
            apy_base: row.get("apy_base"),
            apy_reward: row.get("apy_reward"),
            pool_old: row.get("pool_old"),
        },
        valid_from: from_naive_date(valid_from)?,
        valid_to: from_naive_date(valid_to)?,
        is_current: row.get("is_current"),
        attrib_hash: row.get("attrib_hash"),
        is_active: row.get("is_active"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_sanitize_strips_null_bytes() {
        assert_eq!(sanitize_string("CAKE\0-WBNB"), "CAKE-WBNB");
        assert_eq!(
            sanitize_list(&["a\0".to_string(), "b".to_string()]),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_version_params_convert_dates() {
        let v = PoolVersion::open(
            "p1".to_string(),
            PoolAttributes {
                symbol: "X\0Y".to_string(),
                ..Default::default()
            },
            "h".to_string(),
            date!(2024 - 02 - 29),
        );
        let p = VersionParams::new(&v);

        assert_eq!(p.symbol, "XY");
        assert_eq!(p.valid_from, chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(p.valid_to, chrono::NaiveDate::from_ymd_opt(9999, 12, 31).unwrap());
    }
}
