//! Backup Courier - Main entry point
//!
//! Long-running daemon: restores the newest remote snapshot at startup,
//! then snapshots the watched directory into the remote content store on a
//! cron cadence.

use anyhow::Result;
use backup_courier::daemon::{scheduler::BackupScheduler, shutdown};
use backup_courier::store::github::GithubStore;
use backup_courier::sync::Synchronizer;
use backup_courier::{restore, utils, Config};
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run a single backup cycle after the startup restore, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    // Logging first; BAK_LOG=1 selects debug level unless overridden.
    let verbose = std::env::var("BAK_LOG").as_deref() == Ok("1");
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(if verbose { "debug" } else { "info" });
    utils::logger::init(level)?;

    let config = Arc::new(Config::from_env()?);
    config.log_summary();

    tracing::info!(
        "Starting backup-courier v{} (app: {})",
        env!("CARGO_PKG_VERSION"),
        config.app_name
    );

    let store = Arc::new(GithubStore::new(&config)?);

    // Startup restore is best-effort; the daemon starts and begins
    // producing fresh snapshots even when it fails.
    if !config.restore_delay.is_zero() {
        tracing::info!(
            minutes = config.restore_delay.as_secs() / 60,
            "Delaying startup restore"
        );
        tokio::time::sleep(config.restore_delay).await;
    }
    if let Err(e) = restore::run(store.as_ref(), &config).await {
        tracing::warn!(error = %e, "Startup restore failed, continuing with local state");
    }

    let sync = Arc::new(Synchronizer::new(store, config.clone()));

    if args.once {
        sync.run_cycle_with_retry().await?;
        return Ok(());
    }

    let scheduler = BackupScheduler::new().await?;
    scheduler.schedule(&config.cron, sync).await?;
    scheduler.start().await?;

    shutdown::wait_for_signal().await;
    tracing::info!("Shutting down...");
    scheduler.shutdown().await?;

    Ok(())
}
