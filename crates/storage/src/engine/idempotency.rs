//! Push idempotency cache.
//!
//! Responses are cached by the client-chosen `push_id` inside the same
//! transaction that commits the push, and replayed verbatim on
//! re-delivery. Expired rows are collected lazily on the read path.

use chrono::Utc;
use engram_core::error::{Error, Result};
use sqlx::SqliteConnection;

use super::StoreEngine;

impl StoreEngine {
    /// Look up a cached push response. Returns the exact bytes recorded
    /// at original commit time, or `None` for an unseen (or expired)
    /// `push_id`.
    pub async fn check_push_idempotency(&self, push_id: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::storage(format!("Failed to acquire connection: {e}")))?;
        Self::check_push_idempotency_in(&mut conn, push_id).await
    }

    /// Transaction-scoped idempotency lookup, used to re-check under the
    /// writer lock before replaying.
    pub async fn check_push_idempotency_in(
        conn: &mut SqliteConnection,
        push_id: &str,
    ) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT response_body FROM push_idempotency
             WHERE push_id = ? AND expires_at > ?",
        )
        .bind(push_id)
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::storage(format!("Idempotency lookup failed: {e}")))?;

        Ok(row.map(|(body,)| body))
    }

    /// Record a push response inside the push transaction itself, so a
    /// committed push always has its cached response. Expired rows are
    /// swept here, under the writer lock the caller already holds.
    pub async fn record_push_idempotency(
        conn: &mut SqliteConnection,
        push_id: &str,
        store_id: &str,
        response_body: &[u8],
        ttl: chrono::Duration,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query("DELETE FROM push_idempotency WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::storage(format!("Idempotency GC failed: {e}")))?;
        sqlx::query(
            "INSERT INTO push_idempotency (push_id, store_id, response_body, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(push_id)
        .bind(store_id)
        .bind(response_body)
        .bind(now)
        .bind(now + ttl)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::storage(format!("Idempotency record failed: {e}")))?;
        Ok(())
    }
}
