//! Koinonia Sync Daemon
//!
//! Runs the interaction sync engine: opens the fast ledger and durable
//! store, starts the trigger engine, and sweeps orphaned notifications on
//! an interval.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! koinonia-sync
//!
//! # Start with custom config
//! koinonia-sync --config /path/to/config.toml
//!
//! # Start with custom storage directory
//! koinonia-sync --storage-dir /data/koinonia
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use koinonia_sync::{spawn_cleanup_task, Config, LogOnlyGateway, Services};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "koinonia-sync")]
#[command(about = "Interaction count sync and notification fan-out engine")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "KOINONIA_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Override the cleanup sweep interval in seconds
    #[arg(long)]
    cleanup_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("koinonia_sync=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(secs) = args.cleanup_interval {
        config.cleanup_interval_secs = secs;
    }

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Persist effective config next to the databases
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Wrote default config");
    }

    // No push provider wired up in the standalone daemon; deliveries are
    // logged only
    let services = Services::open(&config, Arc::new(LogOnlyGateway)).await?;

    let cleanup = spawn_cleanup_task(services.durable.clone(), config.cleanup_interval());

    let ledger_stats = services.ledger.stats();
    let durable_stats = services.durable.stats();
    info!(
        storage_dir = %config.storage_dir.display(),
        interactions = ledger_stats.interaction_count,
        entities = durable_stats.entity_count,
        notifications = durable_stats.notification_count,
        "koinonia-sync running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    cleanup.abort();
    services.shutdown().await?;

    Ok(())
}
