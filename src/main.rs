use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::storage::create_s3_client;
use janitor::{CleanupOptions, CleanupSummary, MultipartCleaner, S3MultipartStore};
use tokio::time::MissedTickBehavior;

#[derive(Parser)]
#[command(name = "multipart-janitor")]
#[command(about = "Abort multipart uploads that were never completed")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one cleanup pass (default)
    Run(RunArgs),
    /// Run cleanup passes on an interval until interrupted
    Watch(WatchArgs),
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for Commands {
    fn default() -> Self {
        Self::Run(RunArgs::default())
    }
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Bucket to clean; defaults to the bucket named by the storage DSN
    #[arg(long)]
    bucket: Option<String>,

    /// Log uploads that would be aborted without aborting them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug, Clone)]
struct WatchArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Pause between passes, e.g. "30m"; overrides watch.interval
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Received Ctrl+C");
    }

    Ok(())
}

fn cleanup_options(config: &Configuration, args: &RunArgs) -> CleanupOptions {
    let mut options = CleanupOptions::from(&config.cleanup);
    if args.dry_run {
        options.dry_run = true;
    }
    options
}

/// Build the cleaner and resolve which bucket it works on.
async fn build_cleaner(
    config: &Configuration,
    args: &RunArgs,
) -> Result<(MultipartCleaner, String)> {
    utils::validate_config(config)?;

    let (client, location) = create_s3_client(&config.storage)
        .await
        .context("Failed to create S3 client")?;
    let bucket = args.bucket.clone().unwrap_or(location.bucket);

    let cleaner = MultipartCleaner::new(
        Arc::new(S3MultipartStore::new(client)),
        cleanup_options(config, args),
    );

    Ok((cleaner, bucket))
}

async fn run_once(config: &Configuration, args: &RunArgs) -> Result<CleanupSummary> {
    let (cleaner, bucket) = build_cleaner(config, args).await?;

    tracing::info!(
        bucket = %bucket,
        dry_run = cleaner.options().dry_run,
        "Starting multipart cleanup"
    );

    cleaner
        .cleanup(&bucket)
        .await
        .with_context(|| format!("Multipart cleanup of bucket {bucket} failed"))
}

async fn watch(config: &Configuration, args: &WatchArgs) -> Result<()> {
    let interval = args.interval.unwrap_or(config.watch.interval);
    if interval.is_zero() {
        anyhow::bail!("watch interval must be positive");
    }

    let (cleaner, bucket) = build_cleaner(config, &args.run).await?;

    tracing::info!(
        bucket = %bucket,
        interval = %humantime::format_duration(interval),
        dry_run = cleaner.options().dry_run,
        "Watching for abandoned multipart uploads"
    );

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                tracing::info!("Received shutdown signal, stopping watch");
                return Ok(());
            }
            _ = ticker.tick() => {
                // A failed pass is retried on the next tick
                if let Err(e) = cleaner.cleanup(&bucket).await {
                    tracing::error!(bucket = %bucket, error = %e, "Multipart cleanup pass failed");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command.unwrap_or_default() {
        Commands::Common(command) => utils::handle_common_command(&command, &config),
        Commands::Run(args) => run_once(&config, &args).await.map(|_| ()),
        Commands::Watch(args) => watch(&config, &args).await,
    }
}
