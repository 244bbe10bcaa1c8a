//! Full vs incremental fact building.
//!
//! Mode selection is an explicit caller decision. Probing the warehouse is a
//! best-effort fallback used only before the first full load, and a failed
//! probe resolves to the mode that cannot clear existing rows.

use std::fmt;

use log::{info, warn};
use time::Date;

use crate::db::models::{HistoricalFact, TvlPoint};
use crate::scd::{join, DimensionStore, JoinStats};
use crate::utils::{check_fact_quality, FactQuality};

/// Lifecycle of the destination fact table.
///
/// `Uninitialized -> FullLoad -> Incremental`. Once `Incremental`, the
/// builder never drops back to a full load on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Uninitialized,
    FullLoad,
    Incremental,
}

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedMode {
    Full,
    Incremental,
    /// Let the builder decide from its state and, if needed, a destination probe
    Auto,
}

/// Best-effort view of the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationStatus {
    Absent,
    Empty,
    Populated { rows: u64 },
}

/// Mode chosen for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Whole history, replaces the destination table
    Full,
    /// One date, appended to the destination table
    Incremental { target_date: Date },
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::Incremental { target_date } => write!(f, "incremental({target_date})"),
        }
    }
}

/// Why a mode was chosen, for logs and run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeReason {
    Explicit,
    StateIncremental,
    ProbeAbsentOrEmpty,
    ProbePopulated,
    ProbeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeDecision {
    pub mode: RunMode,
    pub reason: ModeReason,
}

/// Whether `select_mode` needs a destination probe for this state/request.
pub fn needs_probe(state: LoadState, requested: RequestedMode) -> bool {
    requested == RequestedMode::Auto && state == LoadState::Uninitialized
}

/// Resolve the run mode.
///
/// # Arguments
/// * `state` - Persisted load state of the destination
/// * `requested` - Caller's choice
/// * `target_date` - Date used if the run is incremental
/// * `probe` - Destination probe result; only consulted for `Auto` before
///   the first full load. `None` means no probe was attempted.
pub fn select_mode(
    state: LoadState,
    requested: RequestedMode,
    target_date: Date,
    probe: Option<Result<DestinationStatus, String>>,
) -> ModeDecision {
    let incremental = RunMode::Incremental { target_date };

    match requested {
        RequestedMode::Full => {
            if state == LoadState::Incremental {
                warn!("[FACTS] Full load explicitly requested over an initialized table");
            }
            ModeDecision {
                mode: RunMode::Full,
                reason: ModeReason::Explicit,
            }
        },
        RequestedMode::Incremental => ModeDecision {
            mode: incremental,
            reason: ModeReason::Explicit,
        },
        RequestedMode::Auto if state != LoadState::Uninitialized => ModeDecision {
            mode: incremental,
            reason: ModeReason::StateIncremental,
        },
        RequestedMode::Auto => match probe {
            Some(Ok(DestinationStatus::Absent)) | Some(Ok(DestinationStatus::Empty)) => {
                ModeDecision {
                    mode: RunMode::Full,
                    reason: ModeReason::ProbeAbsentOrEmpty,
                }
            },
            Some(Ok(DestinationStatus::Populated { rows })) => {
                info!(
                    "[FACTS] Destination already holds {} rows, continuing incrementally",
                    rows
                );
                ModeDecision {
                    mode: incremental,
                    reason: ModeReason::ProbePopulated,
                }
            },
            Some(Err(e)) => {
                warn!(
                    "[FACTS] Destination probe failed ({}), defaulting to incremental",
                    e
                );
                ModeDecision {
                    mode: incremental,
                    reason: ModeReason::ProbeFailed,
                }
            },
            None => {
                warn!("[FACTS] No destination probe available, defaulting to incremental");
                ModeDecision {
                    mode: incremental,
                    reason: ModeReason::ProbeFailed,
                }
            },
        },
    }
}

/// Rows produced for one run, ready for the uploader.
#[derive(Debug, Clone)]
pub struct FactBatch {
    pub mode: RunMode,
    pub rows: Vec<HistoricalFact>,
    pub stats: JoinStats,
    pub quality: FactQuality,
}

/// Drives the as-of join for a full or single-date build.
#[derive(Debug, Clone)]
pub struct FactBuilder {
    state: LoadState,
}

impl FactBuilder {
    pub fn new(state: LoadState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Build the denormalized rows for `mode`.
    ///
    /// Full mode joins the whole fact history. Incremental mode joins only
    /// facts dated `target_date`, so the result is exactly that day's rows.
    /// Zero dimension coverage is not an error; it yields an empty batch.
    pub fn build(&mut self, mode: RunMode, facts: &[TvlPoint], store: &DimensionStore) -> FactBatch {
        let date_filter = match mode {
            RunMode::Full => {
                if self.state == LoadState::Uninitialized {
                    self.state = LoadState::FullLoad;
                }
                None
            },
            RunMode::Incremental { target_date } => Some(target_date),
        };

        let output = join(facts, store, date_filter);
        let quality = check_fact_quality(&output.facts, output.stats.attribution_gaps());

        if output.facts.is_empty() {
            warn!(
                "[FACTS] {} build produced no rows ({} facts in, {} unattributable)",
                mode,
                output.stats.input,
                output.stats.attribution_gaps()
            );
        }

        if mode == RunMode::Full {
            self.state = LoadState::Incremental;
        }

        FactBatch {
            mode,
            rows: output.facts,
            stats: output.stats,
            quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{PoolAttributes, PoolSnapshot};
    use crate::scd::advance;
    use time::{macros::date, OffsetDateTime, Time};

    const DAY: Date = date!(2024 - 07 - 10);

    #[test]
    fn test_explicit_modes_win() {
        for state in [LoadState::Uninitialized, LoadState::FullLoad, LoadState::Incremental] {
            let full = select_mode(state, RequestedMode::Full, DAY, None);
            assert_eq!(full.mode, RunMode::Full);
            assert_eq!(full.reason, ModeReason::Explicit);

            let inc = select_mode(
                state,
                RequestedMode::Incremental,
                DAY,
                Some(Ok(DestinationStatus::Absent)),
            );
            assert_eq!(inc.mode, RunMode::Incremental { target_date: DAY });
        }
    }

    #[test]
    fn test_auto_never_reenters_full_load() {
        for state in [LoadState::FullLoad, LoadState::Incremental] {
            let decision = select_mode(
                state,
                RequestedMode::Auto,
                DAY,
                Some(Ok(DestinationStatus::Empty)),
            );
            assert_eq!(decision.mode, RunMode::Incremental { target_date: DAY });
            assert_eq!(decision.reason, ModeReason::StateIncremental);
            assert!(!needs_probe(state, RequestedMode::Auto));
        }
    }

    #[test]
    fn test_auto_uses_probe_before_first_load() {
        assert!(needs_probe(LoadState::Uninitialized, RequestedMode::Auto));

        let absent = select_mode(
            LoadState::Uninitialized,
            RequestedMode::Auto,
            DAY,
            Some(Ok(DestinationStatus::Absent)),
        );
        assert_eq!(absent.mode, RunMode::Full);

        let empty = select_mode(
            LoadState::Uninitialized,
            RequestedMode::Auto,
            DAY,
            Some(Ok(DestinationStatus::Empty)),
        );
        assert_eq!(empty.mode, RunMode::Full);

        let populated = select_mode(
            LoadState::Uninitialized,
            RequestedMode::Auto,
            DAY,
            Some(Ok(DestinationStatus::Populated { rows: 42 })),
        );
        assert_eq!(populated.mode, RunMode::Incremental { target_date: DAY });
        assert_eq!(populated.reason, ModeReason::ProbePopulated);
    }

    #[test]
    fn test_failed_probe_defaults_to_incremental() {
        let failed = select_mode(
            LoadState::Uninitialized,
            RequestedMode::Auto,
            DAY,
            Some(Err("connection refused".to_string())),
        );
        assert_eq!(failed.mode, RunMode::Incremental { target_date: DAY });
        assert_eq!(failed.reason, ModeReason::ProbeFailed);

        let missing = select_mode(LoadState::Uninitialized, RequestedMode::Auto, DAY, None);
        assert_eq!(missing.mode, RunMode::Incremental { target_date: DAY });
    }

    fn store() -> DimensionStore {
        let snapshot = vec![
            PoolSnapshot::new(
                "p1",
                PoolAttributes {
                    protocol_slug: "pancakeswap-amm".to_string(),
                    chain: "BSC".to_string(),
                    symbol: "CAKE-WBNB".to_string(),
                    ..Default::default()
                },
            ),
            PoolSnapshot::new(
                "p2",
                PoolAttributes {
                    protocol_slug: "pancakeswap-amm".to_string(),
                    chain: "BSC".to_string(),
                    symbol: "USDT-WBNB".to_string(),
                    ..Default::default()
                },
            ),
        ];
        advance(&DimensionStore::empty(), &snapshot, date!(2024 - 07 - 01))
            .unwrap()
            .store
    }

    fn facts() -> Vec<TvlPoint> {
        let mut out = Vec::new();
        for day in 1..=12u8 {
            for pool in ["p1", "p2", "p3"] {
                out.push(TvlPoint {
                    pool_id: pool.to_string(),
                    timestamp: OffsetDateTime::new_utc(
                        Date::from_calendar_date(2024, time::Month::July, day).unwrap(),
                        Time::from_hms(23, 1, 0).unwrap(),
                    ),
                    tvl_usd: Some(5_000.0),
                    apy: Some(12.0),
                    apy_base: Some(12.0),
                    apy_reward: None,
                });
            }
        }
        out
    }

    #[test]
    fn test_full_build_covers_history_and_advances_state() {
        let mut builder = FactBuilder::new(LoadState::Uninitialized);
        let batch = builder.build(RunMode::Full, &facts(), &store());

        // 12 days x 2 known pools; p3 is never attributable
        assert_eq!(batch.rows.len(), 24);
        assert_eq!(batch.stats.unknown_pool, 12);
        assert_eq!(batch.quality.orphaned_facts, 12);
        assert_eq!(builder.state(), LoadState::Incremental);
    }

    #[test]
    fn test_incremental_build_only_target_date() {
        let mut builder = FactBuilder::new(LoadState::Incremental);
        let facts = facts();
        let target = date!(2024 - 07 - 10);
        let batch = builder.build(RunMode::Incremental { target_date: target }, &facts, &store());

        let incoming_for_date = facts.iter().filter(|f| f.date() == target).count();
        assert_eq!(
            batch.rows.len(),
            incoming_for_date - batch.stats.attribution_gaps()
        );
        assert_eq!(batch.rows.len(), 2);
        assert!(batch.rows.iter().all(|r| r.date == target));
        assert_eq!(builder.state(), LoadState::Incremental);
    }

    #[test]
    fn test_zero_coverage_is_not_an_error() {
        let mut builder = FactBuilder::new(LoadState::Incremental);
        let batch = builder.build(
            RunMode::Incremental { target_date: DAY },
            &facts(),
            &DimensionStore::empty(),
        );

        assert!(batch.rows.is_empty());
        assert_eq!(batch.stats.unknown_pool, 3);
    }
}
