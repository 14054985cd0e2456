//! skycast: night-sky transparency pipeline.
//!
//! Subcommands:
//! - `run`: poll for new cycles until interrupted
//! - `once`: process a single cycle and exit
//! - `clean`: remove stale cycles and abandoned staging directories
//! - `backfill`: fold archived analyses into the monthly climatology
//! - `status`: print the ledger

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use pipeline::{telemetry, CycleOutcome, Pipeline, PipelineConfig, Scheduler};
use sky_common::CycleId;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "skycast")]
#[command(about = "Night-sky transparency forecast pipeline")]
struct Args {
    /// Pipeline configuration file
    #[arg(long, env = "SKYCAST_CONFIG", default_value = "config/pipeline.yaml")]
    config: PathBuf,

    /// Override the cache root from the configuration
    #[arg(long, env = "SKYCAST_CACHE_ROOT")]
    cache_root: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll for new cycles until interrupted
    Run,
    /// Process one cycle (the newest available one by default)
    Once {
        /// Run date, YYYYMMDD
        #[arg(long, requires = "cycle")]
        date: Option<String>,
        /// Run hour: 0, 6, 12 or 18
        #[arg(long, requires = "date")]
        cycle: Option<u8>,
    },
    /// Remove stale cycles and abandoned staging directories
    Clean,
    /// Fold archived 12z analyses of a month into the climatology
    Backfill {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        start_year: i32,
        /// Exclusive
        #[arg(long)]
        end_year: i32,
    },
    /// Show recent cycles and ledger totals
    Status {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);
    match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = if args.config.exists() {
        PipelineConfig::load(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "Config file not found, using defaults");
        PipelineConfig::default()
    };
    if let Some(root) = &args.cache_root {
        config.cache_root = root.clone();
    }
    Ok(config)
}

fn parse_cycle(date: &str, hour: u8) -> Result<CycleId> {
    let date = NaiveDate::parse_from_str(date, "%Y%m%d")
        .with_context(|| format!("Invalid date '{}', expected YYYYMMDD", date))?;
    Ok(CycleId::new(date, hour)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format)?;

    let config = load_config(&args)?;
    if let Some(addr) = config.metrics_addr {
        telemetry::install_exporter(addr)?;
    }

    let pipeline = Arc::new(
        Pipeline::new(config)
            .await
            .context("Failed to initialise pipeline")?,
    );

    match args.command {
        Command::Run => {
            let (shutdown_tx, _) = broadcast::channel::<()>(1);
            let shutdown_tx_clone = shutdown_tx.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Received shutdown signal");
                shutdown_tx_clone.send(()).ok();
            });

            let mut scheduler = Scheduler::new(pipeline.clone());
            scheduler.run_forever(shutdown_tx.subscribe()).await?;
        }
        Command::Once { date, cycle } => {
            let now = Utc::now();
            let id = match (date, cycle) {
                (Some(date), Some(hour)) => parse_cycle(&date, hour)?,
                (None, None) => pipeline.latest_cycle(now),
                _ => bail!("--date and --cycle must be given together"),
            };
            match pipeline.run_cycle(id, now.date_naive()).await? {
                CycleOutcome::Published {
                    snapshot,
                    missing_fields,
                    fold,
                } => info!(
                    cycle = %id,
                    dir = %snapshot.dir().display(),
                    missing_fields,
                    folded_cells = fold.accepted,
                    "Published"
                ),
                CycleOutcome::AlreadyPublished(_) => info!(cycle = %id, "Already published"),
                CycleOutcome::Busy(_) => bail!("cycle {} is being processed elsewhere", id),
            }
        }
        Command::Clean => {
            let report = pipeline.clean(Utc::now()).await?;
            info!(
                cycles_removed = report.cycles_removed.len(),
                staging_removed = report.staging_removed,
                "Cache cleaned"
            );
        }
        Command::Backfill {
            month,
            start_year,
            end_year,
        } => {
            let report = pipeline.backfill(month, start_year, end_year).await?;
            info!(
                month,
                cycles = report.cycles,
                folded = report.folded,
                failed = report.failed,
                "Backfill complete"
            );
        }
        Command::Status { limit } => {
            let horizon = pipeline.horizon();
            let current = pipeline.store().get_current(&horizon).await;
            let published = pipeline.store().list_cycles(&horizon).await?;
            let stats = pipeline.ledger().stats().await?;
            info!(
                current = ?current.map(|s| s.id().key()),
                cached = published.len(),
                published = stats.published,
                failed = stats.failed,
                in_flight = stats.in_flight,
                files_fetched = stats.files_fetched,
                files_failed = stats.files_failed,
                "Pipeline status"
            );
            for record in pipeline.ledger().recent_cycles(limit).await? {
                info!(
                    cycle = %record.cycle,
                    horizon = %record.horizon,
                    status = %record.status,
                    updated_at = %record.updated_at,
                    error = ?record.error_message,
                    "Cycle"
                );
            }
        }
    }

    Ok(())
}
