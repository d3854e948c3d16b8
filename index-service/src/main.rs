//! Runs the index sync engine over a set of watched directories until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use anything_index_sync::{
    ChangeWatcher, IndexSync, LocalBus, MountTable, ProcMountInfo, Publication, PublishedIndex,
    ScheduledDrainer, SyncConfig,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "anything-index-service")]
#[command(about = "Keeps a file-name index in sync with the file system", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Index directory, used when no config file is given
    #[arg(long, required_unless_present = "config")]
    index_dir: Option<PathBuf>,

    /// Flush interval of the addition queue in milliseconds, used when no
    /// config file is given
    #[arg(long, required_unless_present = "config")]
    flush_interval_ms: Option<u64>,

    /// Queue a full rescan of every watched directory on startup
    #[arg(long)]
    rescan: bool,

    /// Directories to watch
    watch: Vec<PathBuf>,
}

impl Cli {
    fn sync_config(&self) -> Result<SyncConfig> {
        if let Some(path) = &self.config {
            return SyncConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()));
        }

        let index_dir = self
            .index_dir
            .clone()
            .context("--index-dir is required without --config")?;
        let flush_interval_ms = self
            .flush_interval_ms
            .context("--flush-interval-ms is required without --config")?;

        let config = SyncConfig::new(index_dir, Duration::from_millis(flush_interval_ms));
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.sync_config()?;
    let identity = config.publish.clone();
    let drain_interval = config.drain_interval();

    let mut builder = IndexSync::builder(config.clone());
    if config.mounts.is_empty() {
        match MountTable::new(ProcMountInfo::default()) {
            Ok(table) => builder = builder.with_mounts(table),
            Err(e) => warn!("Live mount table unavailable, overlay filtering disabled: {e}"),
        }
    }
    let engine = Arc::new(builder.build()?);

    let bus = LocalBus::new();
    let published = match PublishedIndex::claim(engine.clone(), &bus, identity)? {
        Publication::Claimed(published) => Some(published),
        Publication::Adopted => None,
    };

    if cli.rescan {
        for root in &cli.watch {
            match engine.index_directory_tree(root) {
                Ok(queued) => info!("Rescan of {} queued {queued} records", root.display()),
                Err(e) => warn!("Rescan of {} failed: {e}", root.display()),
            }
        }
    }

    let drainer = ScheduledDrainer::spawn(engine.clone(), drain_interval);
    let mut watcher = if cli.watch.is_empty() {
        None
    } else {
        Some(ChangeWatcher::start(engine.clone(), cli.watch.clone())?)
    };

    info!(
        "Index service running (published: {})",
        published
            .as_ref()
            .map(|p| p.identity().to_string())
            .unwrap_or_else(|| "no".to_string())
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");

    if let Some(watcher) = watcher.as_mut() {
        watcher.stop();
    }
    drainer.stop().await;

    let engine_for_join = engine.clone();
    tokio::task::spawn_blocking(move || engine_for_join.terminate()).await?;

    let stats = engine.stats();
    info!(
        "Final state: {} pending, {} additions queued, {:?}",
        stats.pending, stats.additions, stats.counters
    );
    Ok(())
}
