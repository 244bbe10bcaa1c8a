//! End-to-end runs: dimension update, fact update, and both together.
//!
//! Every run computes first and writes last. A fact run uploads before it
//! checkpoints. A combined run persists the dimension before it uploads the
//! facts built from it.

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use time::{Date, OffsetDateTime};

use crate::{
    config::Settings,
    db::{models::PoolSnapshot, Database},
    fetcher::YieldsClient,
    scd::{
        advance, needs_probe, select_mode, DimensionStore, FactBatch, FactBuilder, LoadState,
        RequestedMode,
    },
};

mod report;
mod upload;

pub use report::{DimensionReport, FactsReport, PipelineStatus, RunReport, UploadOutcome};
pub use upload::{plan_upload, UploadPlan};

/// Set once the fact table has been fully loaded.
pub const FULL_LOAD_CHECKPOINT: &str = "historical_facts_full_load";
/// Last successful fact update.
pub const FACTS_CHECKPOINT: &str = "historical_facts_update";
/// Last persisted dimension snapshot.
pub const DIMENSION_CHECKPOINT: &str = "pool_dimension_update";

/// Load state implied by the full-load checkpoint.
pub fn load_state_from(full_load_at: Option<OffsetDateTime>) -> LoadState {
    match full_load_at {
        Some(_) => LoadState::Incremental,
        None => LoadState::Uninitialized,
    }
}

/// Write step of a combined run, after the dimension has been computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStep {
    PersistDimension,
    LoadFacts,
}

/// Steps of a combined run in order. The dimension is stored before facts
/// referencing it are uploaded.
pub fn run_steps(dry_run: bool) -> &'static [RunStep] {
    if dry_run {
        &[RunStep::LoadFacts]
    } else {
        &[RunStep::PersistDimension, RunStep::LoadFacts]
    }
}

/// Keep only pools of the configured protocols. Empty keeps everything.
pub fn filter_projects(snapshot: Vec<PoolSnapshot>, projects: &[String]) -> Vec<PoolSnapshot> {
    if projects.is_empty() {
        return snapshot;
    }
    snapshot
        .into_iter()
        .filter(|p| projects.iter().any(|slug| *slug == p.attributes.protocol_slug))
        .collect()
}

/// Orchestrates fetcher, versioner, builder and both databases.
#[derive(Clone)]
pub struct Pipeline {
    settings: Arc<Settings>,
    db: Database,
    fetcher: YieldsClient,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(settings: Arc<Settings>, db: Database) -> anyhow::Result<Self> {
        let fetcher = YieldsClient::new(settings.upstream.clone())?;
        let dry_run = settings.pipeline.dry_run;
        Ok(Self {
            settings,
            db,
            fetcher,
            dry_run,
        })
    }

    /// Force dry-run on top of the configured setting.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run |= dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Fetch today's pool snapshot, advance the stored dimension to
    /// `snapshot_date` and persist it.
    pub async fn update_dimensions(&self, snapshot_date: Date) -> anyhow::Result<DimensionReport> {
        let start = std::time::Instant::now();
        let (store, mut report) = self.compute_dimensions(snapshot_date).await?;

        if self.dry_run {
            info!("[DIM] Dry run, not persisting {} versions", store.len());
        } else {
            self.persist_dimensions(&store, snapshot_date).await?;
            report.persisted = true;
        }

        info!("{} in {:?}", report, start.elapsed());
        Ok(report)
    }

    /// Build and upload historical facts from the stored dimension.
    pub async fn update_facts(
        &self,
        requested: RequestedMode,
        target_date: Date,
    ) -> anyhow::Result<FactsReport> {
        let start = std::time::Instant::now();
        let store = self.db.postgres.load_dimension_store().await?;

        let report = self.run_facts(&store, requested, target_date).await?;

        info!("{} in {:?}", report, start.elapsed());
        Ok(report)
    }

    /// Dimension update followed by a fact update against the new dimension.
    ///
    /// The dimension is persisted before any fact is uploaded, so uploaded
    /// rows always reference stored versions. If the upload fails, rerunning
    /// `update_facts` rebuilds from the persisted dimension.
    pub async fn run(
        &self,
        requested: RequestedMode,
        snapshot_date: Date,
        target_date: Date,
    ) -> anyhow::Result<RunReport> {
        let start = std::time::Instant::now();

        let (store, mut dimensions) = self.compute_dimensions(snapshot_date).await?;

        let mut facts = None;
        for &step in run_steps(self.dry_run) {
            match step {
                RunStep::PersistDimension => {
                    self.persist_dimensions(&store, snapshot_date).await?;
                    dimensions.persisted = true;
                    info!("{}", dimensions);
                },
                RunStep::LoadFacts => {
                    facts = Some(self.run_facts(&store, requested, target_date).await?);
                },
            }
        }
        if !dimensions.persisted {
            info!("{}", dimensions);
        }

        let facts = facts.ok_or_else(|| anyhow::anyhow!("Run finished without a fact load"))?;
        info!("{}", facts);
        info!("Run completed in {:?}", start.elapsed());

        Ok(RunReport { dimensions, facts })
    }

    // ============================================
    // Dimension
    // ============================================

    async fn compute_dimensions(
        &self,
        snapshot_date: Date,
    ) -> anyhow::Result<(DimensionStore, DimensionReport)> {
        let snapshot = self.fetcher.fetch_pools().await?;
        let snapshot = filter_projects(snapshot, &self.settings.pipeline.target_projects);
        info!(
            "[DIM] Snapshot {} has {} pools after project filter",
            snapshot_date,
            snapshot.len()
        );

        let current = self.db.postgres.load_dimension_store().await?;

        let advanced = advance(&current, &snapshot, snapshot_date)
            .with_context(|| format!("Failed to advance pool dimension to {}", snapshot_date))?;

        let report = DimensionReport {
            snapshot_date,
            snapshot_pools: snapshot.len(),
            stats: advanced.stats,
            versions: advanced.store.len(),
            persisted: false,
        };

        Ok((advanced.store, report))
    }

    async fn persist_dimensions(
        &self,
        store: &DimensionStore,
        snapshot_date: Date,
    ) -> anyhow::Result<()> {
        self.db.postgres.save_dimension_store(store).await?;
        self.db
            .postgres
            .set_cron_checkpoint(DIMENSION_CHECKPOINT, snapshot_date.midnight().assume_utc())
            .await?;
        Ok(())
    }

    // ============================================
    // Facts
    // ============================================

    async fn load_state(&self) -> anyhow::Result<LoadState> {
        let checkpoint = self
            .db
            .postgres
            .get_cron_checkpoint(FULL_LOAD_CHECKPOINT)
            .await
            .context("Failed to read fact load state")?;

        if let Some(at) = checkpoint {
            info!("[FACTS] Full load completed at {}", at);
        }
        Ok(load_state_from(checkpoint))
    }

    async fn run_facts(
        &self,
        store: &DimensionStore,
        requested: RequestedMode,
        target_date: Date,
    ) -> anyhow::Result<FactsReport> {
        let state = self.load_state().await?;

        let probe = if needs_probe(state, requested) {
            Some(
                self.db
                    .clickhouse
                    .destination_status()
                    .await
                    .map_err(|e| format!("{:#}", e)),
            )
        } else {
            None
        };

        let decision = select_mode(state, requested, target_date, probe);
        info!(
            "[FACTS] Mode {} ({:?}), state {:?}",
            decision.mode, decision.reason, state
        );

        let mut pool_ids: Vec<String> = store
            .current_versions()
            .into_keys()
            .map(str::to_string)
            .collect();
        pool_ids.sort_unstable();

        let fetched = self.fetcher.fetch_charts(&pool_ids).await?;

        let mut builder = FactBuilder::new(state);
        let batch = builder.build(decision.mode, &fetched.points, store);

        let upload = self.upload(&batch).await?;

        Ok(FactsReport {
            decision,
            rows: batch.rows.len(),
            stats: batch.stats,
            quality: batch.quality,
            failed_pools: fetched.failed,
            upload,
        })
    }

    async fn upload(&self, batch: &FactBatch) -> anyhow::Result<UploadOutcome> {
        let plan = plan_upload(batch.mode, batch.rows.len(), self.dry_run);

        let outcome = match plan {
            UploadPlan::Skip(UploadOutcome::DryRun) => {
                info!(
                    "[FACTS] Dry run, not uploading {} rows ({})",
                    batch.rows.len(),
                    batch.mode
                );
                UploadOutcome::DryRun
            },
            UploadPlan::Skip(outcome) => {
                warn!("[FACTS] Full build is empty, leaving the live table untouched");
                outcome
            },
            UploadPlan::Replace => UploadOutcome::Replaced {
                rows: self.db.clickhouse.replace_facts(&batch.rows).await?,
            },
            UploadPlan::Append { target_date } => UploadOutcome::Appended(
                self.db
                    .clickhouse
                    .append_facts_for_date(target_date, &batch.rows)
                    .await?,
            ),
        };

        let now = OffsetDateTime::now_utc();
        if plan.completes_full_load() {
            self.db
                .postgres
                .set_cron_checkpoint(FULL_LOAD_CHECKPOINT, now)
                .await?;
        }
        if plan.records_facts_run() {
            self.db
                .postgres
                .set_cron_checkpoint(FACTS_CHECKPOINT, now)
                .await?;
        }

        Ok(outcome)
    }

    // ============================================
    // Maintenance
    // ============================================

    /// Forget the completed full load so the next `Auto` run checks the
    /// warehouse again and may reload the whole table.
    pub async fn reset_full_load(&self) -> anyhow::Result<()> {
        if self.dry_run {
            info!("[FACTS] Dry run, keeping checkpoint {}", FULL_LOAD_CHECKPOINT);
            return Ok(());
        }

        self.db
            .postgres
            .clear_cron_checkpoint(FULL_LOAD_CHECKPOINT)
            .await?;
        warn!("[FACTS] Full-load checkpoint cleared; the next auto run checks the warehouse again");
        Ok(())
    }

    /// Load state, checkpoints, dimension size and warehouse view. Read only.
    pub async fn status(&self) -> anyhow::Result<PipelineStatus> {
        self.db.postgres.health_check().await?;

        let postgres = &self.db.postgres;
        let full_load_at = postgres.get_cron_checkpoint(FULL_LOAD_CHECKPOINT).await?;
        let last_facts_at = postgres.get_cron_checkpoint(FACTS_CHECKPOINT).await?;
        let last_dimension_at = postgres.get_cron_checkpoint(DIMENSION_CHECKPOINT).await?;

        let store = postgres.load_dimension_store().await?;

        let destination = match self.db.clickhouse.health_check().await {
            Ok(()) => self.db.clickhouse.destination_status().await,
            Err(e) => Err(e),
        }
        .map_err(|e| format!("{:#}", e));

        Ok(PipelineStatus {
            load_state: load_state_from(full_load_at),
            full_load_at,
            last_facts_at,
            last_dimension_at,
            versions: store.len(),
            pools: store.pool_count(),
            destination,
        })
    }
}
