//! Engram server CLI
//!
//! This binary loads configuration, wires the store manager, embedding
//! worker, and snapshot scheduler together, and serves the REST API.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engram_core::config::Config;
use engram_embeddings::create_embedding_provider;
use engram_server::{run_server, AppState};
use engram_storage::{default_registry, StoreManager};
use engram_worker::EmbeddingWorker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Multi-tenant lore store with offline-first sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sync server
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Serve) | None => serve(cli.config).await,
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;
    info!("starting engram server");

    let registry = default_registry();
    let manager = Arc::new(StoreManager::new(config.storage.clone(), registry));
    manager
        .get_or_create_default()
        .await
        .context("failed to open the default store")?;

    let provider = if config.embeddings.provider == "none" {
        warn!("embedding provider disabled; entries stay pending");
        None
    } else {
        let provider = create_embedding_provider(&config.embeddings)
            .context("failed to build embedding provider")?;
        provider.check_health().await;
        Some(provider)
    };

    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    if let Some(provider) = provider.clone() {
        let worker =
            EmbeddingWorker::new(manager.clone(), provider, config.worker.clone());
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { worker.run(token).await }));
    }

    if config.snapshot.enabled {
        background.push(tokio::spawn(snapshot_loop(
            manager.clone(),
            Duration::from_secs(config.snapshot.interval_secs),
            config.snapshot.compaction_enabled,
            shutdown.clone(),
        )));
    }

    let state = AppState::new(
        manager.clone(),
        provider,
        None,
        Arc::new(config),
    )?;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let result = run_server(state, shutdown.clone()).await;

    // Stop background tasks, then close every store cleanly.
    shutdown.cancel();
    for task in background {
        if let Err(e) = task.await {
            error!("background task panicked: {e}");
        }
    }
    manager.close_all().await;
    info!("engram server stopped");

    result.map_err(Into::into)
}

/// Periodically snapshot every open store, optionally compacting the
/// change log behind each fresh snapshot.
async fn snapshot_loop(
    manager: Arc<StoreManager>,
    interval: Duration,
    compact: bool,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so startup stays quick.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = token.cancelled() => break,
        }
        for engine in manager.open_engines() {
            match engine.generate_snapshot().await {
                Ok(info) => {
                    info!(store = %engine.store_id(), sequence = info.sequence, "periodic snapshot");
                    if compact {
                        if let Err(e) = engine.compact_change_log().await {
                            error!(store = %engine.store_id(), "compaction failed: {e}");
                        }
                    }
                }
                Err(engram_core::Error::SnapshotInProgress) => {}
                Err(e) => error!(store = %engine.store_id(), "snapshot failed: {e}"),
            }
        }
    }
}
