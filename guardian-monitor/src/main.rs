//! Guardian Monitor daemon
//!
//! Exit codes: 0 graceful shutdown, 2 invalid configuration or schedule,
//! 3 metrics database unreachable at startup, 1 anything else.

use anyhow::{Context, Result};
use clap::Parser;
use guardian_monitor::{
    MemorySink, MetricSampler, Monitor, MonitorConfig, MonitorError, PgSink, ShutdownCoordinator,
    SysinfoProbe, SystemClock,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Samples retained in memory during `--dry-run`
const DRY_RUN_HISTORY: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "guardian-monitor", version, about)]
struct Cli {
    /// TOML config file (defaults to $GUARDIAN_MONITOR_CONFIG or ./guardian-monitor.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Cron expression overriding the configured schedule
    #[arg(long)]
    cron: Option<String>,

    /// Keep samples in memory instead of writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Print a single sample as JSON and exit
    #[arg(long, conflicts_with = "dry_run")]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("guardian_monitor=info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<MonitorError>()
                .map(MonitorError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = MonitorConfig::load(cli.config.as_deref())
        .await
        .map_err(MonitorError::from)
        .context("Failed to load configuration")?;
    if let Some(cron) = cli.cron {
        config.schedule.cron = cron;
    }

    // Schedule problems are reported before touching the database
    let schedule = config.cron_schedule().map_err(MonitorError::from)?;
    let probe = SysinfoProbe::new(&config.probe.disk_path);

    if cli.once {
        let mut sampler = MetricSampler::new(probe, config.probe.cpu_window());
        sampler.collect().await.context("Failed to collect system metrics")?;
        let sample = sampler
            .collect()
            .await
            .context("Failed to collect system metrics")?;
        println!("{}", serde_json::to_string_pretty(&sample)?);
        return Ok(());
    }

    info!("Guardian Monitor v{} starting (schedule: {})", env!("CARGO_PKG_VERSION"), schedule);

    let shutdown = ShutdownCoordinator::new();
    shutdown
        .listen_for_signals()
        .context("Failed to register shutdown signal handlers")?;

    let summary = if cli.dry_run {
        info!("Dry run: samples are kept in memory only");
        let sink = MemorySink::bounded(Arc::new(SystemClock), DRY_RUN_HISTORY);
        Monitor::from_config(&config, probe, sink, SystemClock, shutdown)?
            .run()
            .await?
    } else {
        let sink = PgSink::connect(&config.database)
            .await
            .map_err(MonitorError::from)
            .context("Failed to connect to metrics database")?;
        Monitor::from_config(&config, probe, sink, SystemClock, shutdown)?
            .run()
            .await?
    };

    info!(
        "Monitor stopped after {} persisted and {} dropped ticks",
        summary.ticks_persisted, summary.ticks_dropped
    );
    Ok(())
}
