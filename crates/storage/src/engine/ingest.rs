//! Ingest: validation, optional synchronous deduplication, insertion.

use chrono::Utc;
use engram_core::config::DedupConfig;
use engram_core::error::Result;
use engram_core::{
    generate_lore_id, EmbeddingStatus, IngestError, IngestRequest, IngestResponse, LoreDraft,
    LoreEntry,
};
use engram_embeddings::EmbeddingProvider;
use tracing::{debug, warn};

use super::lore_ops::{
    find_similar_in, insert_lore_in, merge_in, staged_upsert, MergeSource,
};
use super::StoreEngine;

impl StoreEngine {
    /// Ingest a batch of new lore drafts.
    ///
    /// Partial acceptance: invalid drafts are reported in `errors` and
    /// counted in `rejected` while the rest proceed. When an embedding
    /// provider is available and dedup is enabled, embeddings are
    /// computed up front and each draft is merged into its nearest
    /// neighbour at or above the threshold instead of inserted; a
    /// provider failure downgrades the whole batch to pending inserts.
    pub async fn ingest(
        &self,
        request: &IngestRequest,
        provider: Option<&dyn EmbeddingProvider>,
        dedup: &DedupConfig,
    ) -> Result<IngestResponse> {
        let mut response = IngestResponse::default();

        let mut valid: Vec<(usize, &LoreDraft)> = Vec::with_capacity(request.lore.len());
        for (index, draft) in request.lore.iter().enumerate() {
            let field_errors = draft.validate();
            if field_errors.is_empty() {
                valid.push((index, draft));
            } else {
                response.rejected += 1;
                for error in field_errors {
                    response.errors.push(IngestError {
                        index,
                        field: error.field,
                        message: error.message,
                    });
                }
            }
        }

        if valid.is_empty() {
            return Ok(response);
        }

        // Embeddings are computed before the write transaction so the
        // provider round-trip never holds the writer slot.
        let embeddings: Option<Vec<Option<Vec<f32>>>> = match provider {
            Some(provider) if dedup.enabled => {
                let contents: Vec<String> =
                    valid.iter().map(|(_, d)| d.content.clone()).collect();
                match provider.embed(contents).await {
                    Ok(vectors) => Some(vectors),
                    Err(e) => {
                        warn!(
                            store = %self.store_id(),
                            "embedding provider failed during ingest, storing as pending: {e}"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let now = Utc::now();
        let mut changes = Vec::with_capacity(valid.len());
        let mut wtx = self.begin_write().await?;

        for (position, (_, draft)) in valid.iter().enumerate() {
            let embedding = embeddings
                .as_ref()
                .and_then(|vectors| vectors.get(position))
                .and_then(|v| v.clone());

            if let Some(vector) = &embedding {
                let matches =
                    find_similar_in(wtx.conn(), vector, draft.category, dedup.threshold).await?;
                if let Some((best, similarity)) = matches.first() {
                    debug!(
                        store = %self.store_id(),
                        target = %best.id,
                        similarity,
                        "merging near-duplicate ingest entry"
                    );
                    let source = MergeSource {
                        context: draft.context.clone(),
                        source_ids: vec![request.source_id.clone()],
                    };
                    let merged = merge_in(wtx.conn(), &best.id, &source, now).await?;
                    changes.push(staged_upsert(&merged, &request.source_id, now)?);
                    response.merged += 1;
                    continue;
                }
            }

            let entry = LoreEntry {
                id: generate_lore_id(),
                content: draft.content.clone(),
                context: draft.context.clone(),
                category: draft.category,
                confidence: draft.confidence,
                embedding_status: if embedding.is_some() {
                    EmbeddingStatus::Complete
                } else {
                    EmbeddingStatus::Pending
                },
                embedding,
                source_id: request.source_id.clone(),
                sources: vec![request.source_id.clone()],
                validation_count: 0,
                last_validated_at: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            insert_lore_in(wtx.conn(), &entry).await?;
            changes.push(staged_upsert(&entry, &request.source_id, now)?);
            response.accepted += 1;
        }

        Self::append_change_log_batch(wtx.conn(), &changes).await?;
        wtx.commit().await?;

        debug!(
            store = %self.store_id(),
            accepted = response.accepted,
            merged = response.merged,
            rejected = response.rejected,
            "ingest complete"
        );
        Ok(response)
    }
}
