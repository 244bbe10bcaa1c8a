pub mod config;
pub mod cron;
pub mod db;
pub mod fetcher;
pub mod pipeline;
pub mod scd;
pub mod utils;

pub use config::Settings;
pub use cron::CronScheduler;
pub use db::Database;
pub use fetcher::YieldsClient;
pub use pipeline::Pipeline;
