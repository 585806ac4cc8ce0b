//! CLI command definitions for scmsync.
//!
//! Exposes the reaper process entry point (single-pass or loop mode) and a
//! small queue inspection command. Everything prints machine-readable JSON so
//! operational tooling can consume the output directly.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::queue::JobTypeRegistry;
use crate::reaper::{Reaper, ReaperConfig, RecoveryPolicy};
use crate::storage::PgJobStore;

/// SCM sync queue maintenance tool.
#[derive(Parser)]
#[command(name = "scmsync")]
#[command(about = "Maintain the SCM sync job queue: recover stuck work, inspect queue depth")]
#[command(version)]
#[command(
    long_about = "scmsync maintains the durable SCM sync queue.\n\nThe reap command recovers jobs, runs, and locks abandoned by crashed or hung workers, either once or on an interval.\n\nExample usage:\n  scmsync reap --once --grace-seconds 900 --policy to_failed\n  scmsync reap --interval-seconds 300 --dry-run"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Recover expired jobs, runs, and locks.
    Reap(ReapArgs),

    /// Print queue depth by job status.
    Stats(StatsArgs),
}

/// Arguments for `scmsync reap`.
#[derive(Parser, Debug)]
pub struct ReapArgs {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Age in seconds a job lease must exceed before the job is reaped.
    #[arg(long, default_value = "900")]
    pub grace_seconds: i64,

    /// Wall-clock budget in seconds for a sync run, independent of the job
    /// lease.
    #[arg(long, default_value = "3600")]
    pub max_run_duration_seconds: i64,

    /// Age in seconds a lock must exceed before it is force-released.
    #[arg(long, default_value = "1800")]
    pub lock_grace_seconds: i64,

    /// Recovery policy for unknown-classification jobs with attempts left.
    #[arg(long, default_value = "to_failed")]
    pub policy: RecoveryPolicy,

    /// Retry delay in seconds applied by the to_failed policy branch.
    #[arg(long, default_value = "300")]
    pub retry_delay_seconds: i64,

    /// Scale factor applied to computed backoff for transient errors.
    #[arg(long, default_value = "1.0")]
    pub transient_retry_multiplier: f64,

    /// Base delay in seconds for the transient backoff curve.
    #[arg(long, default_value = "60")]
    pub backoff_base_seconds: u64,

    /// Cap in seconds on computed transient backoff.
    #[arg(long, default_value = "3600")]
    pub max_backoff_seconds: u64,

    /// Discover and report counts without mutating anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Run a single pass and exit instead of looping.
    #[arg(long)]
    pub once: bool,

    /// Seconds between passes in loop mode.
    #[arg(long, default_value = "300")]
    pub interval_seconds: u64,
}

/// Arguments for `scmsync stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

/// Parses CLI arguments from the process environment.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and runs the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the selected command with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Reap(args) => run_reap(args).await,
        Commands::Stats(args) => run_stats(args).await,
    }
}

async fn run_reap(args: ReapArgs) -> anyhow::Result<()> {
    let registry = JobTypeRegistry::new();
    let store = Arc::new(PgJobStore::connect(&args.database_url, registry).await?);

    let config = ReaperConfig::new()
        .with_job_grace_seconds(args.grace_seconds)
        .with_run_max_duration_seconds(args.max_run_duration_seconds)
        .with_lock_grace_seconds(args.lock_grace_seconds)
        .with_policy(args.policy)
        .with_retry_delay_seconds(args.retry_delay_seconds)
        .with_transient_retry_multiplier(args.transient_retry_multiplier)
        .with_backoff_seconds(args.backoff_base_seconds, args.max_backoff_seconds)
        .with_dry_run(args.dry_run);

    let reaper = Reaper::new(store, config);

    if args.once {
        let report = reaper.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        interval_seconds = args.interval_seconds,
        dry_run = args.dry_run,
        "Starting reaper loop"
    );

    let interval = Duration::from_secs(args.interval_seconds.max(1));
    tokio::select! {
        _ = reaper.run_loop(interval) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c, shutting down");
        }
    }

    Ok(())
}

async fn run_stats(args: StatsArgs) -> anyhow::Result<()> {
    let store = PgJobStore::connect(&args.database_url, JobTypeRegistry::new()).await?;
    let stats = store.queue_stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
