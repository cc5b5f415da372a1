//! Background embedding worker.
//!
//! Sweeps every open store for entries with `embedding_status = pending`,
//! embeds them in batches through the configured provider, and writes the
//! vectors back (each write-back appends its own change-log upsert).
//! Retryable provider failures leave entries pending and back off
//! exponentially; permanent failures mark entries `failed`.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use engram_core::config::WorkerConfig;
use engram_core::error::{Error, Result};
use engram_embeddings::EmbeddingProvider;
use engram_storage::{StoreEngine, StoreManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep across all open stores.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Entries whose vectors were written back
    pub completed: usize,
    /// Entries marked permanently failed
    pub failed: usize,
    /// Stores whose batch was left pending for a later sweep because of
    /// a retryable failure
    pub deferred_stores: usize,
}

impl SweepOutcome {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

pub struct EmbeddingWorker {
    manager: Arc<StoreManager>,
    provider: Arc<dyn EmbeddingProvider>,
    config: WorkerConfig,
}

impl EmbeddingWorker {
    pub fn new(
        manager: Arc<StoreManager>,
        provider: Arc<dyn EmbeddingProvider>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            manager,
            provider,
            config,
        }
    }

    /// Run until cancelled.
    ///
    /// Cancellation is observed between batches: an in-flight batch
    /// completes its write-backs before the loop exits.
    pub async fn run(&self, token: CancellationToken) {
        info!("embedding worker started");
        let mut backoff = Duration::from_millis(self.config.backoff_initial_ms);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if token.is_cancelled() {
                break;
            }

            let outcome = self.sweep_once().await;
            if outcome.total() > 0 {
                debug!(
                    completed = outcome.completed,
                    failed = outcome.failed,
                    deferred_stores = outcome.deferred_stores,
                    "embedding sweep progressed"
                );
            }

            if outcome.deferred_stores > 0 {
                error!(
                    deferred_stores = outcome.deferred_stores,
                    "embedding sweep deferred work, backing off {backoff:?}"
                );
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = token.cancelled() => break,
                }
                backoff =
                    (backoff * 2).min(Duration::from_millis(self.config.backoff_max_ms));
            } else if outcome.total() > 0 {
                backoff = Duration::from_millis(self.config.backoff_initial_ms);
                // More work may be queued; poll again immediately.
                continue;
            } else {
                backoff = Duration::from_millis(self.config.backoff_initial_ms);
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = token.cancelled() => break,
                }
            }
        }
        info!("embedding worker stopped");
    }

    /// Process one batch per open store and accumulate the combined
    /// outcome. A store whose batch fails is skipped for this sweep and
    /// counted in `deferred_stores` (its entries stay pending); progress
    /// already committed for other stores is always reported.
    pub async fn sweep_once(&self) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        for engine in self.manager.open_engines() {
            match self.process_store(&engine).await {
                Ok(store_outcome) => {
                    outcome.completed += store_outcome.completed;
                    outcome.failed += store_outcome.failed;
                }
                Err(e) => {
                    outcome.deferred_stores += 1;
                    warn!(
                        store = %engine.store_id(),
                        "embedding batch deferred to a later sweep: {e}"
                    );
                }
            }
        }
        outcome
    }

    async fn process_store(&self, engine: &Arc<StoreEngine>) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();
        let pending = engine
            .pending_embeddings(self.config.batch_size as i64)
            .await?;
        if pending.is_empty() {
            return Ok(outcome);
        }

        let contents: Vec<String> = pending.iter().map(|e| e.content.clone()).collect();
        let vectors = match self.provider.embed(contents).await {
            Ok(vectors) => vectors,
            Err(e) if e.is_retryable() => {
                // Entries stay pending; the sweep defers this store.
                return Err(Error::from(e));
            }
            Err(e) => {
                warn!(
                    store = %engine.store_id(),
                    batch = pending.len(),
                    "provider rejected batch permanently: {e}"
                );
                for entry in &pending {
                    self.mark_failed(engine, &entry.id).await;
                    outcome.failed += 1;
                }
                return Ok(outcome);
            }
        };

        for (entry, vector) in pending.iter().zip(vectors) {
            match vector {
                Some(vector) => match engine.set_embedding(&entry.id, &vector).await {
                    Ok(()) => outcome.completed += 1,
                    Err(e) if e.is_not_found() => {
                        // Deleted while we were embedding; nothing to do.
                        debug!(store = %engine.store_id(), id = %entry.id, "entry vanished mid-batch");
                    }
                    Err(e) => return Err(e),
                },
                None => {
                    warn!(
                        store = %engine.store_id(),
                        id = %entry.id,
                        "provider skipped entry, marking failed"
                    );
                    self.mark_failed(engine, &entry.id).await;
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn mark_failed(&self, engine: &Arc<StoreEngine>, id: &str) {
        if let Err(e) = engine.mark_embedding_failed(id).await {
            if !e.is_not_found() {
                error!(store = %engine.store_id(), id, "failed to mark entry failed: {e}");
            }
        }
    }
}
