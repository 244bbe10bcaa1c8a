#[allow(clippy::module_inception)]
mod config;

pub use self::config::{
    ClickHouseSettings, CronSettings, PipelineSettings, PostgresSettings, Settings,
    UpstreamSettings,
};
