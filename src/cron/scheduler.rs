//! Cron scheduler for the periodic pipeline runs.
//!
//! Runs jobs like:
//! - Versioning the pool dimension against a fresh snapshot (weekly)
//! - Attributing and loading the previous day's TVL facts (daily)
//!
//! Jobs share one run lock. A job that fires while another still runs is
//! skipped.

use std::{future::Future, sync::Arc};

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::{config::CronSettings, pipeline::Pipeline};

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    pipeline: Arc<Pipeline>,
    settings: Arc<CronSettings>,
    run_lock: Arc<Mutex<()>>,
}

impl CronScheduler {
    pub fn new(pipeline: Arc<Pipeline>, settings: CronSettings) -> Self {
        Self {
            pipeline,
            settings: Arc::new(settings),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        // Register all jobs
        self.register_dimension_update_job(&scheduler).await?;
        self.register_daily_facts_job(&scheduler).await?;

        // Start the scheduler
        scheduler.start().await?;
        info!("[CRON] Scheduler started with {} jobs", 2);

        // Wait for cancellation
        cancellation_token.cancelled().await;
        info!("[CRON] Scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_dimension_update_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let run_lock = self.run_lock.clone();
        let schedule = self.settings.dimension_schedule.clone();

        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            let run_lock = run_lock.clone();
            Box::pin(async move {
                guarded("dimension_update", &run_lock, jobs::dimension_update::run(&pipeline))
                    .await;
            })
        })?;

        scheduler.add(job).await?;
        info!("[CRON] Registered dimension_update job ({})", schedule);
        Ok(())
    }

    async fn register_daily_facts_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let run_lock = self.run_lock.clone();
        let schedule = self.settings.facts_schedule.clone();

        let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            let run_lock = run_lock.clone();
            Box::pin(async move {
                guarded("daily_facts", &run_lock, jobs::daily_facts::run(&pipeline)).await;
            })
        })?;

        scheduler.add(job).await?;
        info!("[CRON] Registered daily_facts job ({})", schedule);
        Ok(())
    }
}

/// Run `job` while holding the shared run lock, or skip it if the lock is taken.
///
/// Returns false when the job was skipped.
async fn guarded<F>(name: &str, run_lock: &Mutex<()>, job: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    let Ok(_guard) = run_lock.try_lock() else {
        warn!("[CRON] Skipping {} job: another run is in progress", name);
        return false;
    };

    if let Err(e) = job.await {
        error!("[CRON] {} job failed: {:#}", name, e);
    }
    true
}
