//! Daily job that attributes the latest TVL measurements and loads them.
//!
//! Runs in `Auto` mode: the first run on an empty warehouse performs the full
//! load, every later run appends one day.

use anyhow::Result;
use log::info;
use time::{Duration, OffsetDateTime};

use crate::{pipeline::Pipeline, scd::RequestedMode};

/// Loads facts for yesterday (UTC), the last complete day.
pub async fn run(pipeline: &Pipeline) -> Result<()> {
    let target_date = OffsetDateTime::now_utc().date() - Duration::days(1);
    info!("[CRON] Starting daily_facts job for {}...", target_date);

    let report = pipeline
        .update_facts(RequestedMode::Auto, target_date)
        .await?;

    info!("[CRON] Completed daily_facts job: {}", report.upload);
    Ok(())
}
