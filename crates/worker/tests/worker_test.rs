//! Integration tests for the embedding worker.

use async_trait::async_trait;
use engram_core::config::{DedupConfig, StorageConfig, WorkerConfig};
use engram_core::{EmbeddingStatus, IngestRequest, LoreCategory, LoreDraft, StoreId};
use engram_embeddings::{EmbeddingError, EmbeddingProvider, MockEmbeddingProvider};
use engram_storage::{default_registry, StoreEngine, StoreManager};
use engram_worker::EmbeddingWorker;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn manager_with_default(root: &Path) -> (Arc<StoreManager>, Arc<StoreEngine>) {
    let config = StorageConfig {
        data_dir: root.to_path_buf(),
        ..Default::default()
    };
    let manager = Arc::new(StoreManager::new(config, default_registry()));
    let engine = manager.get_or_create_default().await.unwrap();
    (manager, engine)
}

async fn seed_pending(engine: &StoreEngine, contents: &[&str]) {
    let request = IngestRequest {
        source_id: "src-1".to_string(),
        lore: contents
            .iter()
            .map(|content| LoreDraft {
                content: content.to_string(),
                context: None,
                category: LoreCategory::PatternOutcome,
                confidence: 0.5,
            })
            .collect(),
    };
    let dedup = DedupConfig {
        enabled: false,
        threshold: 0.92,
    };
    engine.ingest(&request, None, &dedup).await.unwrap();
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 10,
        batch_size: 2,
        backoff_initial_ms: 10,
        backoff_max_ms: 50,
    }
}

#[tokio::test]
async fn sweep_drains_pending_entries_in_batches() {
    let dir = TempDir::new().unwrap();
    let (manager, engine) = manager_with_default(dir.path()).await;
    seed_pending(&engine, &["one", "two", "three"]).await;

    let provider = Arc::new(MockEmbeddingProvider::new(4));
    let worker = EmbeddingWorker::new(manager, provider, worker_config());

    // Batch size is 2, so two sweeps drain all three entries.
    let first = worker.sweep_once().await;
    assert_eq!(first.completed, 2);
    let second = worker.sweep_once().await;
    assert_eq!(second.completed, 1);
    let third = worker.sweep_once().await;
    assert_eq!(third.total(), 0);
    assert_eq!(third.deferred_stores, 0);

    assert!(engine.pending_embeddings(10).await.unwrap().is_empty());
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.by_embedding_status.get("complete"), Some(&3));
}

#[tokio::test]
async fn write_back_appends_change_log_entries() {
    let dir = TempDir::new().unwrap();
    let (manager, engine) = manager_with_default(dir.path()).await;
    seed_pending(&engine, &["logged"]).await;
    let seq_before = engine.latest_sequence().await.unwrap();

    let worker = EmbeddingWorker::new(
        manager,
        Arc::new(MockEmbeddingProvider::new(4)),
        worker_config(),
    );
    worker.sweep_once().await;

    assert_eq!(engine.latest_sequence().await.unwrap(), seq_before + 1);
}

struct PermanentFailureProvider;

#[async_trait]
impl EmbeddingProvider for PermanentFailureProvider {
    async fn embed(
        &self,
        _texts: Vec<String>,
    ) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
        Err(EmbeddingError::InferenceError("bad input".to_string()))
    }
    fn embedding_dimension(&self) -> usize {
        4
    }
    fn model_name(&self) -> &str {
        "permafail"
    }
}

#[tokio::test]
async fn permanent_failure_marks_entries_failed() {
    let dir = TempDir::new().unwrap();
    let (manager, engine) = manager_with_default(dir.path()).await;
    seed_pending(&engine, &["doomed", "also doomed"]).await;

    let worker = EmbeddingWorker::new(
        manager,
        Arc::new(PermanentFailureProvider),
        worker_config(),
    );
    let outcome = worker.sweep_once().await;
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.completed, 0);
    assert_eq!(outcome.deferred_stores, 0);

    assert!(engine.pending_embeddings(10).await.unwrap().is_empty());
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.by_embedding_status.get("failed"), Some(&2));
}

struct RetryableFailureProvider;

#[async_trait]
impl EmbeddingProvider for RetryableFailureProvider {
    async fn embed(
        &self,
        _texts: Vec<String>,
    ) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
        Err(EmbeddingError::ProviderUnavailable("503".to_string()))
    }
    fn embedding_dimension(&self) -> usize {
        4
    }
    fn model_name(&self) -> &str {
        "flaky"
    }
}

#[tokio::test]
async fn retryable_failure_leaves_entries_pending() {
    let dir = TempDir::new().unwrap();
    let (manager, engine) = manager_with_default(dir.path()).await;
    seed_pending(&engine, &["patient"]).await;

    let worker = EmbeddingWorker::new(
        manager,
        Arc::new(RetryableFailureProvider),
        worker_config(),
    );
    let outcome = worker.sweep_once().await;
    assert_eq!(outcome.total(), 0);
    assert_eq!(outcome.deferred_stores, 1);

    let pending = engine.pending_embeddings(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].embedding_status, EmbeddingStatus::Pending);
}

/// Fails only for one store's content, so a sweep across two stores
/// makes real progress on the healthy one.
struct SelectiveFailureProvider {
    poison: String,
    inner: MockEmbeddingProvider,
}

#[async_trait]
impl EmbeddingProvider for SelectiveFailureProvider {
    async fn embed(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
        if texts.iter().any(|t| t == &self.poison) {
            return Err(EmbeddingError::ProviderUnavailable("503".to_string()));
        }
        self.inner.embed(texts).await
    }
    fn embedding_dimension(&self) -> usize {
        4
    }
    fn model_name(&self) -> &str {
        "selective"
    }
}

#[tokio::test]
async fn one_flaky_store_does_not_discard_another_stores_progress() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let manager = Arc::new(StoreManager::new(config, default_registry()));
    let healthy = manager
        .create(&StoreId::parse("org/healthy").unwrap(), "recall", None)
        .await
        .unwrap();
    let flaky = manager
        .create(&StoreId::parse("org/flaky").unwrap(), "recall", None)
        .await
        .unwrap();
    seed_pending(&healthy, &["fine"]).await;
    seed_pending(&flaky, &["poisoned"]).await;

    let provider = Arc::new(SelectiveFailureProvider {
        poison: "poisoned".to_string(),
        inner: MockEmbeddingProvider::new(4),
    });
    let worker = EmbeddingWorker::new(manager, provider, worker_config());

    // The flaky store is deferred; the healthy store's committed work is
    // still reported.
    let outcome = worker.sweep_once().await;
    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.deferred_stores, 1);
    assert!(healthy.pending_embeddings(10).await.unwrap().is_empty());
    assert_eq!(flaky.pending_embeddings(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn run_stops_promptly_on_cancellation() {
    let dir = TempDir::new().unwrap();
    let (manager, _engine) = manager_with_default(dir.path()).await;

    let worker = Arc::new(EmbeddingWorker::new(
        manager,
        Arc::new(MockEmbeddingProvider::new(4)),
        worker_config(),
    ));
    let token = CancellationToken::new();
    let handle = {
        let worker = worker.clone();
        let token = token.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    token.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("worker did not observe cancellation")
        .unwrap();
}
