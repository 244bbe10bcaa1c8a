use crate::pipeline::UploadOutcome;
use crate::scd::RunMode;
use time::Date;

/// Warehouse action for a built batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    /// Nothing is written and no checkpoint moves
    Skip(UploadOutcome),
    /// Swap in the whole table, then mark the full load done
    Replace,
    /// Append the rows of one date
    Append { target_date: Date },
}

impl UploadPlan {
    /// Whether a successful upload sets the full-load checkpoint.
    pub fn completes_full_load(&self) -> bool {
        matches!(self, UploadPlan::Replace)
    }

    /// Whether a successful upload moves the last-facts checkpoint.
    pub fn records_facts_run(&self) -> bool {
        !matches!(self, UploadPlan::Skip(_))
    }
}

/// Route a batch to the warehouse.
///
/// An empty full build never replaces the live table, since that would clear
/// it.
pub fn plan_upload(mode: RunMode, rows: usize, dry_run: bool) -> UploadPlan {
    if dry_run {
        return UploadPlan::Skip(UploadOutcome::DryRun);
    }

    match mode {
        RunMode::Full if rows == 0 => UploadPlan::Skip(UploadOutcome::NothingToReplace),
        RunMode::Full => UploadPlan::Replace,
        RunMode::Incremental { target_date } => UploadPlan::Append { target_date },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const DAY: Date = date!(2024 - 07 - 10);

    #[test]
    fn test_empty_full_build_is_skipped() {
        let plan = plan_upload(RunMode::Full, 0, false);

        assert_eq!(plan, UploadPlan::Skip(UploadOutcome::NothingToReplace));
        assert!(!plan.completes_full_load());
        assert!(!plan.records_facts_run());
    }

    #[test]
    fn test_full_build_replaces_and_completes_load() {
        let plan = plan_upload(RunMode::Full, 24, false);

        assert_eq!(plan, UploadPlan::Replace);
        assert!(plan.completes_full_load());
        assert!(plan.records_facts_run());
    }

    #[test]
    fn test_incremental_appends_without_full_load() {
        let mode = RunMode::Incremental { target_date: DAY };

        for rows in [0, 2] {
            let plan = plan_upload(mode, rows, false);
            assert_eq!(plan, UploadPlan::Append { target_date: DAY });
            assert!(!plan.completes_full_load());
            assert!(plan.records_facts_run());
        }
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        for mode in [RunMode::Full, RunMode::Incremental { target_date: DAY }] {
            let plan = plan_upload(mode, 10, true);
            assert_eq!(plan, UploadPlan::Skip(UploadOutcome::DryRun));
            assert!(!plan.completes_full_load());
            assert!(!plan.records_facts_run());
        }
    }
}
