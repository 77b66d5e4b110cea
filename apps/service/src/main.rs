use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, level_filters::LevelFilter, warn};

use storewatch::config::Config;
use storewatch::database::DatabaseImpl;
use storewatch::monitoring::{ActiveWindow, HttpProber, Trigger};
use storewatch::orchestrator::{CycleError, CycleSettings, Invocation, Orchestrator};
use storewatch::report::Reporter;
use storewatch::snapshot::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one window-gated monitoring cycle
    Run {
        /// Run even outside the active window
        #[arg(long)]
        manual: bool,

        /// Instant to evaluate the window against (RFC 3339), defaults to now
        #[arg(long, value_name = "RFC3339")]
        at: Option<DateTime<Utc>>,

        /// Probe and report, but keep the published snapshot untouched
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the latest summary and recent check count
    Report,
    /// Show database statistics and today's uptime per store
    Stats,
    /// Show the active window and the UTC schedule it needs
    Window,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = Config::from_config(cli.config.as_deref()).context("Failed to load configuration")?;

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        logger::parse_level(&config.logging.level).unwrap_or(LevelFilter::INFO)
    };
    logger::init_with_level(level);

    let window = config.active_window()?;

    match cli.command {
        Command::Run { manual, at, dry_run } => run_cycle(&config, &window, manual, at, dry_run).await,
        Command::Report => {
            let database = load_published(&config).await?;
            let status = Reporter::new(&database, window.offset()).status(Utc::now()).await?;
            println!("{status}");
            Ok(0)
        }
        Command::Stats => {
            let database = load_published(&config).await?;
            let stats = Reporter::new(&database, window.offset()).stats(Utc::now()).await?;
            println!("{stats}");
            Ok(0)
        }
        Command::Window => {
            let hours: Vec<String> = window.utc_hours().iter().map(u32::to_string).collect();
            println!("Active window: {window}");
            println!("UTC hours:     {}", hours.join(","));
            println!("Cron (UTC):    {}", window.cron_expression());
            Ok(0)
        }
        Command::Config => {
            println!("{config}");
            Ok(0)
        }
    }
}

async fn run_cycle(
    config: &Config,
    window: &ActiveWindow,
    manual: bool,
    at: Option<DateTime<Utc>>,
    dry_run: bool,
) -> Result<u8> {
    let stores = config.tracked_stores().context("Failed to load tracked stores")?;
    if stores.is_empty() {
        warn!("No stores configured, the cycle will record an empty summary");
    }

    let file_store = Arc::new(FileSnapshotStore::new(&config.snapshot.directory));
    let snapshots: Arc<dyn SnapshotStore> = if dry_run {
        match InMemorySnapshotStore::mirror(file_store.as_ref(), &config.snapshot.name).await {
            Ok(mirror) => Arc::new(mirror),
            Err(e) => return Ok(aborted(&CycleError::Restore(e))),
        }
    } else {
        file_store
    };

    let prober = Arc::new(HttpProber::new(
        config.probe_timeout(),
        &config.probe.user_agent,
        &config.probe.closed_markers,
    )?);
    let orchestrator = Orchestrator::new(snapshots, prober, stores, CycleSettings::from_config(config));

    let trigger = if manual { Trigger::Manual } else { Trigger::Scheduled };
    let now = at.unwrap_or_else(Utc::now);

    match orchestrator.invoke(now, trigger, window).await {
        Ok(Invocation::Skipped { local_time }) => {
            println!("Outside active window {window} (local time {local_time}), nothing to do");
            Ok(0)
        }
        Ok(Invocation::Completed(report)) => {
            println!("{report}");
            if let Some(snapshot) = &report.snapshot {
                match DatabaseImpl::restore(snapshot).await {
                    Ok(database) => {
                        println!("{}", Reporter::new(&database, window.offset()).status(now).await?)
                    }
                    Err(e) => warn!(error = %e, "Could not reload snapshot for reporting"),
                }
            }
            Ok(report.exit_code())
        }
        Err(e) => Ok(aborted(&e)),
    }
}

fn aborted(e: &CycleError) -> u8 {
    error!(error = %e, "Cycle aborted");
    println!("Cycle aborted: {e}");
    e.exit_code()
}

/// Restore the published snapshot read-only; no artifact means an empty database
async fn load_published(config: &Config) -> Result<DatabaseImpl> {
    let store = FileSnapshotStore::new(&config.snapshot.directory);
    let snapshot = store.fetch(&config.snapshot.name).await.context("Failed to read snapshot")?;

    let database = match snapshot {
        Some(snapshot) => DatabaseImpl::restore(&snapshot).await?,
        None => DatabaseImpl::open_empty().await?,
    };
    Ok(database)
}
