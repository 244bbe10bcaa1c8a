use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// ClickHouse warehouse configuration.
///
/// Holds the denormalized historical-facts table. Full loads go through a
/// `{facts_table}_staging` table and are swapped in atomically.
#[derive(Debug, Deserialize, Clone)]
pub struct ClickHouseSettings {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_facts_table")]
    pub facts_table: String,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

fn default_facts_table() -> String {
    "pool_historical_facts".to_string()
}

fn default_insert_batch_size() -> usize {
    100_000
}

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - The SCD2 pool dimension (`pool_versions`)
/// - Run checkpoints (last dimension update, fact load state)
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    4
}

/// Upstream yields API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Concurrent per-pool chart requests
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles on each attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://yields.llama.fi".to_string()
}

fn default_concurrency() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Pipeline behaviour.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineSettings {
    /// Protocol slugs to keep; empty keeps every pool
    #[serde(default)]
    pub target_projects: Vec<String>,
    /// Compute everything but skip warehouse uploads and store writes
    #[serde(default)]
    pub dry_run: bool,
}

/// Cron expressions (with seconds) for the scheduled jobs.
#[derive(Debug, Deserialize, Clone)]
pub struct CronSettings {
    /// Weekly dimension refresh - default Mondays 02:00 UTC
    #[serde(default = "default_dimension_schedule")]
    pub dimension_schedule: String,
    /// Daily fact update - default 06:00 UTC
    #[serde(default = "default_facts_schedule")]
    pub facts_schedule: String,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            dimension_schedule: default_dimension_schedule(),
            facts_schedule: default_facts_schedule(),
        }
    }
}

fn default_dimension_schedule() -> String {
    "0 0 2 * * Mon".to_string()
}

fn default_facts_schedule() -> String {
    "0 0 6 * * *".to_string()
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, overridden by `YIELDSCD__*`
/// environment variables (e.g. `YIELDSCD__CLICKHOUSE__PASSWORD`).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub clickhouse: ClickHouseSettings,
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub cron: CronSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(Environment::with_prefix("YIELDSCD").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}
