use std::fmt;

use time::{Date, OffsetDateTime};

use crate::db::AppendOutcome;
use crate::scd::{DestinationStatus, JoinStats, LoadState, ModeDecision, VersioningStats};
use crate::utils::FactQuality;

/// Outcome of one dimension update.
#[derive(Debug, Clone)]
pub struct DimensionReport {
    pub snapshot_date: Date,
    /// Pools in the (project-filtered) snapshot
    pub snapshot_pools: usize,
    pub stats: VersioningStats,
    /// Versions in the resulting store
    pub versions: usize,
    pub persisted: bool,
}

/// What the warehouse write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Replaced { rows: u64 },
    Appended(AppendOutcome),
    /// Full build produced no rows; the live table was left as is
    NothingToReplace,
    DryRun,
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Replaced { rows } => write!(f, "replaced table with {rows} rows"),
            UploadOutcome::Appended(AppendOutcome::Inserted { rows }) => {
                write!(f, "appended {rows} rows")
            },
            UploadOutcome::Appended(AppendOutcome::AlreadyPresent { existing }) => {
                write!(f, "skipped, date already has {existing} rows")
            },
            UploadOutcome::Appended(AppendOutcome::Empty) => write!(f, "nothing to append"),
            UploadOutcome::NothingToReplace => write!(f, "nothing to replace"),
            UploadOutcome::DryRun => write!(f, "dry run, nothing written"),
        }
    }
}

/// Outcome of one fact update.
#[derive(Debug, Clone)]
pub struct FactsReport {
    pub decision: ModeDecision,
    pub rows: usize,
    pub stats: JoinStats,
    pub quality: FactQuality,
    /// Pools whose chart could not be fetched
    pub failed_pools: Vec<String>,
    pub upload: UploadOutcome,
}

/// Outcome of a combined dimension + fact run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub dimensions: DimensionReport,
    pub facts: FactsReport,
}

impl fmt::Display for DimensionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[DIM] {}: {} pools, {} new, {} changed, {} unchanged, {} same-day, {} absent -> {} versions{}",
            self.snapshot_date,
            self.snapshot_pools,
            self.stats.new_pools,
            self.stats.closed,
            self.stats.unchanged,
            self.stats.replaced_same_day,
            self.stats.untouched_absent,
            self.versions,
            if self.persisted { "" } else { " (not persisted)" }
        )
    }
}

impl fmt::Display for FactsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[FACTS] {} ({:?}): {} rows from {} facts, {} unattributable, {} pools failed, {}",
            self.decision.mode,
            self.decision.reason,
            self.rows,
            self.stats.input,
            self.stats.attribution_gaps(),
            self.failed_pools.len(),
            self.upload
        )
    }
}

/// Read-only view of where the pipeline stands.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub load_state: LoadState,
    pub full_load_at: Option<OffsetDateTime>,
    pub last_facts_at: Option<OffsetDateTime>,
    pub last_dimension_at: Option<OffsetDateTime>,
    /// Versions in the stored dimension
    pub versions: usize,
    /// Distinct pools in the stored dimension
    pub pools: usize,
    /// Warehouse view, or why it could not be read
    pub destination: Result<DestinationStatus, String>,
}

fn checkpoint(at: &Option<OffsetDateTime>) -> String {
    match at {
        Some(at) => at.to_string(),
        None => "never".to_string(),
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "load state:       {:?}", self.load_state)?;
        writeln!(f, "full load:        {}", checkpoint(&self.full_load_at))?;
        writeln!(f, "last facts run:   {}", checkpoint(&self.last_facts_at))?;
        writeln!(f, "last dimension:   {}", checkpoint(&self.last_dimension_at))?;
        writeln!(
            f,
            "dimension:        {} versions over {} pools",
            self.versions, self.pools
        )?;
        match &self.destination {
            Ok(DestinationStatus::Absent) => write!(f, "warehouse:        table missing"),
            Ok(DestinationStatus::Empty) => write!(f, "warehouse:        empty"),
            Ok(DestinationStatus::Populated { rows }) => {
                write!(f, "warehouse:        {rows} rows")
            },
            Err(e) => write!(f, "warehouse:        unreachable ({e})"),
        }
    }
}
