//! Change-log reads, the in-transaction batch append, and compaction.

use chrono::Utc;
use engram_core::error::{Error, Result};
use engram_core::{ChangeLogEntry, StagedChange};
use sqlx::SqliteConnection;
use tracing::info;

use super::{meta_keys, StoreEngine};
use crate::types::change_log_from_row;

/// AUTOINCREMENT bookkeeping survives row deletion, unlike
/// MAX(sequence).
const LATEST_SEQUENCE_SQL: &str =
    "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'change_log'), 0)";

/// Result of one compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Log records removed by this pass
    pub removed: u64,
    /// Highest compacted sequence; deltas must start at or after this
    pub horizon: i64,
}

impl StoreEngine {
    /// Append staged changes to the log inside a caller-provided
    /// transaction, returning the sequences the database assigned, in
    /// input order.
    pub async fn append_change_log_batch(
        conn: &mut SqliteConnection,
        changes: &[StagedChange],
    ) -> Result<Vec<i64>> {
        let mut sequences = Vec::with_capacity(changes.len());
        for change in changes {
            let payload_text = change
                .payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| Error::storage(format!("Failed to serialize payload: {e}")))?;

            let (sequence,): (i64,) = sqlx::query_as(
                "INSERT INTO change_log
                     (table_name, entity_id, operation, payload, source_id, created_at, received_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 RETURNING sequence",
            )
            .bind(&change.table_name)
            .bind(&change.entity_id)
            .bind(change.operation.to_string())
            .bind(payload_text)
            .bind(&change.source_id)
            .bind(change.created_at)
            .bind(change.received_at)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Error::storage(format!("Change-log append failed: {e}")))?;

            sequences.push(sequence);
        }
        Ok(sequences)
    }

    /// Fetch up to `limit` log entries with sequence strictly greater
    /// than `after`, in ascending sequence order.
    pub async fn get_change_log_after(
        &self,
        after: i64,
        limit: i64,
    ) -> Result<Vec<ChangeLogEntry>> {
        let rows = sqlx::query(
            "SELECT sequence, table_name, entity_id, operation, payload,
                    source_id, created_at, received_at
             FROM change_log
             WHERE sequence > ?
             ORDER BY sequence ASC
             LIMIT ?",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::storage(format!("Change-log read failed: {e}")))?;

        rows.iter().map(change_log_from_row).collect()
    }

    /// The highest sequence ever committed in this store, or 0 when the
    /// log has never been written. Read from `sqlite_sequence` so
    /// compaction cannot make it regress.
    pub async fn latest_sequence(&self) -> Result<i64> {
        let (sequence,): (i64,) = sqlx::query_as(LATEST_SEQUENCE_SQL)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("Sequence read failed: {e}")))?;
        Ok(sequence)
    }

    /// Transaction-scoped variant of [`latest_sequence`](Self::latest_sequence).
    pub async fn latest_sequence_in(conn: &mut SqliteConnection) -> Result<i64> {
        let (sequence,): (i64,) = sqlx::query_as(LATEST_SEQUENCE_SQL)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Error::storage(format!("Sequence read failed: {e}")))?;
        Ok(sequence)
    }

    /// Sequence up to which the log has been compacted (0 when never
    /// compacted). Deltas starting below this must bootstrap from a
    /// snapshot instead.
    pub async fn compaction_horizon(&self) -> Result<i64> {
        Ok(self
            .get_metadata(meta_keys::LAST_COMPACTION_SEQ)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Drop log records already captured by the latest snapshot.
    ///
    /// Only records at or below `last_snapshot_seq` are removed, so any
    /// client past the snapshot can still pull an unbroken tail; clients
    /// behind the horizon re-bootstrap. A store that has never produced
    /// a snapshot compacts nothing.
    pub async fn compact_change_log(&self) -> Result<CompactionOutcome> {
        let boundary: i64 = self
            .get_metadata(meta_keys::LAST_SNAPSHOT_SEQ)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if boundary == 0 {
            return Ok(CompactionOutcome {
                removed: 0,
                horizon: self.compaction_horizon().await?,
            });
        }

        let now = Utc::now();
        let mut wtx = self.begin_write().await?;
        let result = sqlx::query("DELETE FROM change_log WHERE sequence <= ?")
            .bind(boundary)
            .execute(&mut *wtx.conn())
            .await
            .map_err(|e| Error::storage(format!("Compaction failed: {e}")))?;
        sqlx::query(
            "INSERT INTO sync_metadata (key, value) VALUES (?, ?), (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(meta_keys::LAST_COMPACTION_SEQ)
        .bind(boundary.to_string())
        .bind(meta_keys::LAST_COMPACTION_AT)
        .bind(now.to_rfc3339())
        .execute(&mut *wtx.conn())
        .await
        .map_err(|e| Error::storage(format!("Compaction bookkeeping failed: {e}")))?;
        wtx.commit().await?;

        let outcome = CompactionOutcome {
            removed: result.rows_affected(),
            horizon: boundary,
        };
        if outcome.removed > 0 {
            info!(
                store = %self.store_id(),
                removed = outcome.removed,
                horizon = outcome.horizon,
                "change log compacted"
            );
        }
        Ok(outcome)
    }
}
