use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use time::{Date, Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use yieldscd::{scd::RequestedMode, utils::parse_date, CronScheduler, Database, Pipeline, Settings};

#[derive(Parser)]
#[command(name = "yieldscd", version, about = "SCD2 pool dimension and historical TVL facts")]
struct Cli {
    /// Compute everything but write nothing
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update the pool dimension, then load facts against it
    Run {
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
        /// Snapshot date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long, value_parser = date_arg)]
        snapshot_date: Option<Date>,
        /// Incremental target date (YYYY-MM-DD), defaults to yesterday (UTC)
        #[arg(long, value_parser = date_arg)]
        date: Option<Date>,
    },
    /// Version the pool dimension against a fresh snapshot
    Dimensions {
        /// Snapshot date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long, value_parser = date_arg)]
        date: Option<Date>,
    },
    /// Attribute TVL facts and load them into the warehouse
    Facts {
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
        /// Incremental target date (YYYY-MM-DD), defaults to yesterday (UTC)
        #[arg(long, value_parser = date_arg)]
        date: Option<Date>,
    },
    /// Run the cron jobs until Ctrl+C / SIGTERM
    Schedule,
    /// Show load state, checkpoints, dimension size and warehouse rows
    Status,
    /// Clear the full-load checkpoint so the next auto run may reload everything
    ResetFullLoad,
}

impl Commands {
    /// Whether the command reads only, whatever the dry-run setting.
    fn is_read_only(&self) -> bool {
        matches!(self, Commands::Status)
    }
}

/// Schemas are applied only by runs that may write. A dry run or `status`
/// expects an already migrated database.
fn needs_migration(cmd: &Commands, dry_run: bool) -> bool {
    !dry_run && !cmd.is_read_only()
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Incremental,
    Auto,
}

impl From<ModeArg> for RequestedMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => RequestedMode::Full,
            ModeArg::Incremental => RequestedMode::Incremental,
            ModeArg::Auto => RequestedMode::Auto,
        }
    }
}

fn date_arg(s: &str) -> Result<Date, String> {
    parse_date(s).map_err(|e| format!("{:#}", e))
}

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    let cli = Cli::parse();

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let db = Database::new(settings.clone())
        .await
        .context("Failed to initialize database connection")?;

    let dry_run = cli.dry_run || settings.pipeline.dry_run;
    if needs_migration(&cli.cmd, dry_run) {
        db.migrate().await.context("Failed to run migrations")?;
    } else {
        info!("Skipping migrations, the schema must already exist");
    }

    let pipeline = Pipeline::new(settings.clone(), db)?.with_dry_run(cli.dry_run);
    if pipeline.is_dry_run() {
        info!("Dry run: nothing will be written");
    }

    let today = OffsetDateTime::now_utc().date();
    let yesterday = today - Duration::days(1);

    match cli.cmd {
        Commands::Run {
            mode,
            snapshot_date,
            date,
        } => {
            pipeline
                .run(
                    mode.into(),
                    snapshot_date.unwrap_or(today),
                    date.unwrap_or(yesterday),
                )
                .await?;
        },
        Commands::Dimensions { date } => {
            pipeline.update_dimensions(date.unwrap_or(today)).await?;
        },
        Commands::Facts { mode, date } => {
            pipeline
                .update_facts(mode.into(), date.unwrap_or(yesterday))
                .await?;
        },
        Commands::Schedule => {
            run_scheduler(settings, Arc::new(pipeline)).await?;
        },
        Commands::Status => {
            let status = pipeline.status().await?;
            println!("{}", status);
        },
        Commands::ResetFullLoad => {
            pipeline.reset_full_load().await?;
        },
    }

    Ok(())
}

async fn run_scheduler(settings: Arc<Settings>, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();

    let cron_scheduler = CronScheduler::new(pipeline, settings.cron.clone());

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Scheduler running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    cancellation_token.cancel();

    // A running job finishes before the scheduler stops
    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Scheduler stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("yieldscd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_dry_run_flag_after_subcommand() {
        let cli = parse(&["facts", "--mode", "full", "--dry-run"]);
        assert!(cli.dry_run);
        assert!(matches!(
            cli.cmd,
            Commands::Facts {
                mode: ModeArg::Full,
                date: None
            }
        ));
    }

    #[test]
    fn test_dry_run_skips_migration() {
        let cli = parse(&["--dry-run", "run"]);
        assert!(!needs_migration(&cli.cmd, cli.dry_run));

        let cli = parse(&["run"]);
        assert!(needs_migration(&cli.cmd, cli.dry_run));
    }

    #[test]
    fn test_status_never_migrates() {
        let cli = parse(&["status"]);
        assert!(!needs_migration(&cli.cmd, false));
    }

    #[test]
    fn test_reset_full_load_subcommand() {
        let cli = parse(&["reset-full-load"]);
        assert!(matches!(cli.cmd, Commands::ResetFullLoad));
        assert!(needs_migration(&cli.cmd, false));
    }

    #[test]
    fn test_date_argument_is_validated() {
        let cli = parse(&["dimensions", "--date", "2024-07-08"]);
        assert!(matches!(
            cli.cmd,
            Commands::Dimensions {
                date: Some(d)
            } if d == time::macros::date!(2024 - 07 - 08)
        ));

        assert!(Cli::try_parse_from(["yieldscd", "dimensions", "--date", "08/07/2024"]).is_err());
    }
}
