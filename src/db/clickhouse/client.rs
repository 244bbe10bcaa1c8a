use anyhow::Context;
use clickhouse::Client;
use log::info;

use crate::config::ClickHouseSettings;

/// ClickHouse warehouse client.
///
/// Holds the denormalized `pool_historical_facts` table and its staging twin
/// used for atomic full reloads.
pub struct ClickhouseClient {
    pub client: Client,
    pub facts_table: String,
    pub insert_batch_size: u64,
}

impl ClickhouseClient {
    pub async fn new(settings: ClickHouseSettings) -> anyhow::Result<Self> {
        info!("Connecting to ClickHouse");

        let client = Client::default()
            .with_url(settings.url.clone())
            .with_user(settings.user.clone())
            .with_password(settings.password.clone())
            .with_database(settings.database.clone());

        // Test connection with retry logic
        let mut retries = 0;
        let max_retries = 3;

        loop {
            match client.query("SELECT 1").fetch_one::<u8>().await {
                Ok(_) => {
                    info!("Successfully connected to ClickHouse");
                    break;
                },
                Err(e) => {
                    retries += 1;

                    if retries >= max_retries {
                        return Err(anyhow::anyhow!(
                            "Failed to connect to ClickHouse after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }

                    let delay = std::time::Duration::from_millis(100 * 2_u64.pow(retries));
                    log::warn!(
                        "Failed to connect to ClickHouse (attempt {}/{}), retrying in {:?}... Error: {}",
                        retries,
                        max_retries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }

        Ok(Self {
            client,
            facts_table: settings.facts_table,
            insert_batch_size: settings.insert_batch_size.max(1) as u64,
        })
    }

    /// Staging table that full reloads are written to before the swap.
    pub fn staging_table(&self) -> String {
        format!("{}_staging", self.facts_table)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running ClickHouse migrations");
        let schema = tokio::fs::read_to_string("schema/clickhouse.sql")
            .await
            .context("Failed to read schema/clickhouse.sql")?;

        for stmt in migration_statements(&schema, &self.facts_table) {
            self.client
                .query(&stmt)
                .execute()
                .await
                .with_context(|| format!("Failed to execute migration statement: {}", stmt))?;
        }

        info!("ClickHouse migrations completed successfully");
        Ok(())
    }

    /// Health check - verify connection is still alive
    pub async fn health_check(&self) -> anyhow::Result<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .context("ClickHouse health check failed")?;
        Ok(())
    }
}

/// Split the schema on `;` and substitute the configured facts table name.
fn migration_statements(schema: &str, facts_table: &str) -> Vec<String> {
    schema
        .split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(|stmt| stmt.replace("{facts_table}", facts_table))
        .collect()
}
