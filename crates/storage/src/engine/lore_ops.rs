//! Lore operations: reads, merge, delete, embedding write-back, and
//! feedback.

use chrono::{DateTime, Utc};
use engram_core::error::{Error, Result};
use engram_core::lore::{
    boost_confidence, merge_context, union_sources, HELPFUL_CONFIDENCE_BOOST,
    INCORRECT_CONFIDENCE_PENALTY, MERGE_CONFIDENCE_BOOST,
};
use engram_core::{
    ChangeOperation, EmbeddingStatus, FeedbackItem, FeedbackResponse, FeedbackResult,
    FeedbackType, LoreCategory, LoreEntry, SkippedFeedback, StagedChange,
};
use sqlx::SqliteConnection;
use std::cmp::Ordering;
use tracing::debug;

use super::StoreEngine;
use crate::types::{cosine_similarity, encode_embedding, lore_from_row};

/// Writer recorded on change-log records produced by the server itself
/// (embedding write-back, failure marking) rather than a client.
pub const SYSTEM_SOURCE_ID: &str = "system";

/// The source half of a merge: context to append and source ids to union
/// into the target.
#[derive(Debug, Clone, Default)]
pub struct MergeSource {
    pub context: Option<String>,
    pub source_ids: Vec<String>,
}

const LORE_COLUMNS: &str = "id, content, context, category, confidence, embedding, \
     embedding_status, source_id, sources, validation_count, last_validated_at, \
     created_at, updated_at, deleted_at";

/// Build the change-log upsert record for the entry's current state.
pub(crate) fn staged_upsert(
    entry: &LoreEntry,
    source_id: &str,
    now: DateTime<Utc>,
) -> Result<StagedChange> {
    let payload = serde_json::to_value(entry)
        .map_err(|e| Error::storage(format!("Failed to serialize lore row: {e}")))?;
    Ok(StagedChange {
        table_name: "lore".to_string(),
        entity_id: entry.id.clone(),
        operation: ChangeOperation::Upsert,
        payload: Some(payload),
        source_id: source_id.to_string(),
        created_at: now,
        received_at: now,
    })
}

pub(crate) fn staged_delete(
    entity_id: &str,
    source_id: &str,
    now: DateTime<Utc>,
) -> StagedChange {
    StagedChange {
        table_name: "lore".to_string(),
        entity_id: entity_id.to_string(),
        operation: ChangeOperation::Delete,
        payload: None,
        source_id: source_id.to_string(),
        created_at: now,
        received_at: now,
    }
}

/// Fetch a row by id regardless of deletion state.
async fn fetch_lore_in(conn: &mut SqliteConnection, id: &str) -> Result<Option<LoreEntry>> {
    let sql = format!("SELECT {LORE_COLUMNS} FROM lore WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::storage(format!("Lore read failed: {e}")))?;
    row.as_ref().map(lore_from_row).transpose()
}

/// Persist every mutable column of an entry.
pub(crate) async fn update_lore_in(conn: &mut SqliteConnection, entry: &LoreEntry) -> Result<()> {
    let sources_json = serde_json::to_string(&entry.sources)
        .map_err(|e| Error::storage(format!("Failed to serialize sources: {e}")))?;
    sqlx::query(
        "UPDATE lore SET
             content = ?, context = ?, category = ?, confidence = ?, embedding = ?,
             embedding_status = ?, source_id = ?, sources = ?, validation_count = ?,
             last_validated_at = ?, updated_at = ?, deleted_at = ?
         WHERE id = ?",
    )
    .bind(&entry.content)
    .bind(&entry.context)
    .bind(entry.category.to_string())
    .bind(entry.confidence)
    .bind(entry.embedding.as_deref().map(encode_embedding))
    .bind(entry.embedding_status.to_string())
    .bind(&entry.source_id)
    .bind(sources_json)
    .bind(entry.validation_count)
    .bind(entry.last_validated_at)
    .bind(entry.updated_at)
    .bind(entry.deleted_at)
    .bind(&entry.id)
    .execute(&mut *conn)
    .await
    .map_err(|e| Error::storage(format!("Lore update failed: {e}")))?;
    Ok(())
}

/// Insert a freshly created entry.
pub(crate) async fn insert_lore_in(conn: &mut SqliteConnection, entry: &LoreEntry) -> Result<()> {
    let sources_json = serde_json::to_string(&entry.sources)
        .map_err(|e| Error::storage(format!("Failed to serialize sources: {e}")))?;
    let sql = format!(
        "INSERT INTO lore ({LORE_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&sql)
        .bind(&entry.id)
        .bind(&entry.content)
        .bind(&entry.context)
        .bind(entry.category.to_string())
        .bind(entry.confidence)
        .bind(entry.embedding.as_deref().map(encode_embedding))
        .bind(entry.embedding_status.to_string())
        .bind(&entry.source_id)
        .bind(sources_json)
        .bind(entry.validation_count)
        .bind(entry.last_validated_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(entry.deleted_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::storage(format!("Lore insert failed: {e}")))?;
    Ok(())
}

/// Apply the merge rules to `target`: boost confidence, append context,
/// union sources, bump `updated_at`.
fn apply_merge(target: &mut LoreEntry, source: &MergeSource, now: DateTime<Utc>) {
    target.confidence = boost_confidence(target.confidence, MERGE_CONFIDENCE_BOOST);
    target.context = merge_context(target.context.as_deref(), source.context.as_deref());
    union_sources(&mut target.sources, &source.source_ids);
    target.updated_at = now;
}

/// Transaction-scoped merge used by both the public op and dedup.
pub(crate) async fn merge_in(
    conn: &mut SqliteConnection,
    target_id: &str,
    source: &MergeSource,
    now: DateTime<Utc>,
) -> Result<LoreEntry> {
    let mut target = fetch_lore_in(conn, target_id)
        .await?
        .filter(|entry| !entry.is_deleted())
        .ok_or_else(|| Error::not_found("lore entry", target_id))?;

    apply_merge(&mut target, source, now);
    update_lore_in(conn, &target).await?;
    Ok(target)
}

/// Transaction-scoped similarity lookup used by dedup, so entries
/// inserted earlier in the same request are candidates.
pub(crate) async fn find_similar_in(
    conn: &mut SqliteConnection,
    query: &[f32],
    category: LoreCategory,
    threshold: f32,
) -> Result<Vec<(LoreEntry, f32)>> {
    let sql = format!(
        "SELECT {LORE_COLUMNS} FROM lore
         WHERE deleted_at IS NULL
           AND category = ?
           AND embedding_status = 'complete'
           AND embedding IS NOT NULL"
    );
    let rows = sqlx::query(&sql)
        .bind(category.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::storage(format!("Similarity scan failed: {e}")))?;

    let mut scored = Vec::new();
    for row in &rows {
        let entry = lore_from_row(row)?;
        let Some(embedding) = entry.embedding.as_deref() else {
            continue;
        };
        let similarity = cosine_similarity(query, embedding);
        if similarity >= threshold {
            scored.push((entry, similarity));
        }
    }

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.0.updated_at.cmp(&a.0.updated_at))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    Ok(scored)
}

impl StoreEngine {
    /// Fetch a non-deleted entry by id.
    pub async fn get(&self, id: &str) -> Result<LoreEntry> {
        let mut conn = self
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::storage(format!("Failed to acquire connection: {e}")))?;
        fetch_lore_in(&mut conn, id)
            .await?
            .filter(|entry| !entry.is_deleted())
            .ok_or_else(|| Error::not_found("lore entry", id))
    }

    /// Entries in `category` whose cosine similarity to `query` is at
    /// least `threshold`, best first. Ties break on `updated_at`
    /// descending, then id ascending.
    pub async fn find_similar(
        &self,
        query: &[f32],
        category: LoreCategory,
        threshold: f32,
        limit: Option<usize>,
    ) -> Result<Vec<(LoreEntry, f32)>> {
        let mut conn = self
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::storage(format!("Failed to acquire connection: {e}")))?;
        let mut scored = find_similar_in(&mut conn, query, category, threshold).await?;
        if let Some(limit) = limit {
            scored.truncate(limit);
        }
        Ok(scored)
    }

    /// Merge `source` into the entry `target_id`; `source_id` is the
    /// writer recorded on the change-log record.
    pub async fn merge(
        &self,
        target_id: &str,
        source: &MergeSource,
        source_id: &str,
    ) -> Result<LoreEntry> {
        let now = Utc::now();
        let mut wtx = self.begin_write().await?;
        let merged = merge_in(wtx.conn(), target_id, source, now).await?;
        let change = staged_upsert(&merged, source_id, now)?;
        Self::append_change_log_batch(wtx.conn(), &[change]).await?;
        wtx.commit().await?;
        Ok(merged)
    }

    /// Soft-delete an entry.
    ///
    /// Returns `true` when the entry was deleted by this call. Deleting
    /// an already-deleted entry is a complete no-op (no row update, no
    /// change-log record) and returns `false`.
    pub async fn delete(&self, id: &str, source_id: &str) -> Result<bool> {
        let now = Utc::now();
        let mut wtx = self.begin_write().await?;

        let mut entry = fetch_lore_in(wtx.conn(), id)
            .await?
            .ok_or_else(|| Error::not_found("lore entry", id))?;
        if entry.is_deleted() {
            wtx.rollback().await?;
            return Ok(false);
        }

        entry.deleted_at = Some(now);
        entry.updated_at = now;
        update_lore_in(wtx.conn(), &entry).await?;
        Self::append_change_log_batch(wtx.conn(), &[staged_delete(id, source_id, now)]).await?;
        wtx.commit().await?;
        Ok(true)
    }

    /// Entries waiting for the embedding worker, oldest first.
    pub async fn pending_embeddings(&self, limit: i64) -> Result<Vec<LoreEntry>> {
        let sql = format!(
            "SELECT {LORE_COLUMNS} FROM lore
             WHERE embedding_status = 'pending' AND deleted_at IS NULL
             ORDER BY created_at ASC
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(|e| Error::storage(format!("Pending scan failed: {e}")))?;
        rows.iter().map(lore_from_row).collect()
    }

    /// Write back a computed embedding and flip the entry to `complete`.
    pub async fn set_embedding(&self, id: &str, vector: &[f32]) -> Result<()> {
        let now = Utc::now();
        let mut wtx = self.begin_write().await?;

        let mut entry = fetch_lore_in(wtx.conn(), id)
            .await?
            .filter(|entry| !entry.is_deleted())
            .ok_or_else(|| Error::not_found("lore entry", id))?;

        entry.embedding = Some(vector.to_vec());
        entry.embedding_status = EmbeddingStatus::Complete;
        entry.updated_at = now;
        update_lore_in(wtx.conn(), &entry).await?;
        let change = staged_upsert(&entry, SYSTEM_SOURCE_ID, now)?;
        Self::append_change_log_batch(wtx.conn(), &[change]).await?;
        wtx.commit().await?;
        Ok(())
    }

    /// Mark an entry permanently failed for embedding purposes.
    pub async fn mark_embedding_failed(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        let mut wtx = self.begin_write().await?;

        let mut entry = fetch_lore_in(wtx.conn(), id)
            .await?
            .filter(|entry| !entry.is_deleted())
            .ok_or_else(|| Error::not_found("lore entry", id))?;

        entry.embedding_status = EmbeddingStatus::Failed;
        entry.updated_at = now;
        update_lore_in(wtx.conn(), &entry).await?;
        let change = staged_upsert(&entry, SYSTEM_SOURCE_ID, now)?;
        Self::append_change_log_batch(wtx.conn(), &[change]).await?;
        wtx.commit().await?;
        Ok(())
    }

    /// Apply a feedback batch.
    ///
    /// `helpful` boosts confidence and counts a validation; `incorrect`
    /// penalises confidence; `not_relevant` records nothing but still
    /// reports the (unchanged) confidence. Missing or deleted entries are
    /// skipped with a reason.
    pub async fn record_feedback(
        &self,
        items: &[FeedbackItem],
        source_id: &str,
    ) -> Result<FeedbackResponse> {
        let now = Utc::now();
        let mut response = FeedbackResponse::default();
        let mut changes = Vec::new();
        let mut wtx = self.begin_write().await?;

        for item in items {
            let Some(mut entry) = fetch_lore_in(wtx.conn(), &item.lore_id).await? else {
                response.skipped.push(SkippedFeedback {
                    lore_id: item.lore_id.clone(),
                    reason: "not found".to_string(),
                });
                continue;
            };
            if entry.is_deleted() {
                response.skipped.push(SkippedFeedback {
                    lore_id: item.lore_id.clone(),
                    reason: "deleted".to_string(),
                });
                continue;
            }

            let before = entry.confidence;
            let mut validation_count = None;
            match item.feedback_type {
                FeedbackType::Helpful => {
                    entry.confidence = boost_confidence(before, HELPFUL_CONFIDENCE_BOOST);
                    entry.validation_count += 1;
                    entry.last_validated_at = Some(now);
                    entry.updated_at = now;
                    validation_count = Some(entry.validation_count);
                }
                FeedbackType::Incorrect => {
                    entry.confidence = boost_confidence(before, -INCORRECT_CONFIDENCE_PENALTY);
                    entry.updated_at = now;
                }
                FeedbackType::NotRelevant => {}
            }

            if item.feedback_type != FeedbackType::NotRelevant {
                update_lore_in(wtx.conn(), &entry).await?;
                changes.push(staged_upsert(&entry, source_id, now)?);
            }

            response.results.push(FeedbackResult {
                lore_id: item.lore_id.clone(),
                feedback_type: item.feedback_type,
                confidence_before: before,
                confidence_after: entry.confidence,
                validation_count,
            });
        }

        Self::append_change_log_batch(wtx.conn(), &changes).await?;
        wtx.commit().await?;

        debug!(
            store = %self.store_id(),
            applied = response.results.len(),
            skipped = response.skipped.len(),
            "feedback recorded"
        );
        Ok(response)
    }
}
