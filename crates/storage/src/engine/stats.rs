//! Store counters and quality statistics.

use engram_core::error::{Error, Result};
use engram_core::{ExtendedStats, QualityBands, StoreStats};
use sqlx::Row;

use super::StoreEngine;

impl StoreEngine {
    /// Number of live (non-deleted) lore entries.
    pub async fn lore_count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM lore WHERE deleted_at IS NULL")
                .fetch_one(self.pool())
                .await
                .map_err(|e| Error::storage(format!("Count failed: {e}")))?;
        Ok(count)
    }

    /// Basic counters: totals plus category and embedding-status
    /// breakdowns over live entries.
    pub async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        let (total, deleted): (i64, i64) = sqlx::query_as(
            "SELECT
                 COUNT(*) FILTER (WHERE deleted_at IS NULL),
                 COUNT(*) FILTER (WHERE deleted_at IS NOT NULL)
             FROM lore",
        )
        .fetch_one(self.pool())
        .await
        .map_err(|e| Error::storage(format!("Stats query failed: {e}")))?;
        stats.total = total;
        stats.deleted = deleted;

        let category_rows = sqlx::query(
            "SELECT category, COUNT(*) AS n FROM lore
             WHERE deleted_at IS NULL GROUP BY category",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::storage(format!("Category stats failed: {e}")))?;
        for row in category_rows {
            let category: String = row
                .try_get("category")
                .map_err(|e| Error::storage(format!("Failed to extract category: {e}")))?;
            let count: i64 = row
                .try_get("n")
                .map_err(|e| Error::storage(format!("Failed to extract count: {e}")))?;
            stats.by_category.insert(category, count);
        }

        let status_rows = sqlx::query(
            "SELECT embedding_status, COUNT(*) AS n FROM lore
             WHERE deleted_at IS NULL GROUP BY embedding_status",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::storage(format!("Status stats failed: {e}")))?;
        for row in status_rows {
            let status: String = row
                .try_get("embedding_status")
                .map_err(|e| Error::storage(format!("Failed to extract status: {e}")))?;
            let count: i64 = row
                .try_get("n")
                .map_err(|e| Error::storage(format!("Failed to extract count: {e}")))?;
            stats.by_embedding_status.insert(status, count);
        }

        Ok(stats)
    }

    /// Everything in [`stats`](Self::stats) plus confidence bands,
    /// validation totals, and the latest change-log sequence.
    pub async fn extended_stats(&self) -> Result<ExtendedStats> {
        let base = self.stats().await?;

        let (high, medium, low, validation_total): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT
                 COUNT(*) FILTER (WHERE confidence >= 0.8),
                 COUNT(*) FILTER (WHERE confidence >= 0.5 AND confidence < 0.8),
                 COUNT(*) FILTER (WHERE confidence < 0.5),
                 COALESCE(SUM(validation_count), 0)
             FROM lore WHERE deleted_at IS NULL",
        )
        .fetch_one(self.pool())
        .await
        .map_err(|e| Error::storage(format!("Quality stats failed: {e}")))?;

        Ok(ExtendedStats {
            base,
            quality_bands: QualityBands { high, medium, low },
            validation_total,
            latest_sequence: self.latest_sequence().await?,
        })
    }
}
