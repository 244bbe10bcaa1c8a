use std::sync::Arc;

use crate::config::Settings;

pub mod clickhouse;
pub mod models;
pub mod postgres;

pub use clickhouse::{AppendOutcome, ClickhouseClient};
pub use postgres::PostgresClient;

/// Combined database client managing ClickHouse and PostgreSQL connections.
///
/// ClickHouse holds the denormalized historical facts for analytics.
/// PostgreSQL holds the SCD2 pool dimension and run checkpoints.
#[derive(Clone)]
pub struct Database {
    pub clickhouse: Arc<ClickhouseClient>,
    pub postgres: Arc<PostgresClient>,
}

impl Database {
    /// Connect both clients. Schemas are left as they are; see `migrate`.
    pub async fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let clickhouse = ClickhouseClient::new(settings.clickhouse.clone()).await?;
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;

        Ok(Self {
            clickhouse: Arc::new(clickhouse),
            postgres: Arc::new(postgres),
        })
    }

    /// Apply `schema/*.sql` to both databases.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        self.clickhouse.migrate().await?;
        self.postgres.migrate().await?;
        Ok(())
    }
}
