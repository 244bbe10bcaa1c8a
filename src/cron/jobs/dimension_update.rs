//! Weekly job that versions the pool dimension against a fresh snapshot.

use anyhow::Result;
use log::info;
use time::OffsetDateTime;

use crate::pipeline::Pipeline;

/// Advances the SCD2 pool dimension to today's snapshot (UTC).
pub async fn run(pipeline: &Pipeline) -> Result<()> {
    let snapshot_date = OffsetDateTime::now_utc().date();
    info!("[CRON] Starting dimension_update job for {}...", snapshot_date);

    let report = pipeline.update_dimensions(snapshot_date).await?;

    info!(
        "[CRON] Completed dimension_update job: {} versions opened, {} closed",
        report.stats.opened, report.stats.closed
    );
    Ok(())
}
