//! Sync protocol execution: idempotent push and paginated delta.
//!
//! The HTTP layer parses and authenticates; everything the protocol
//! promises (idempotent replay, schema checks, all-or-nothing
//! validation, replay + change-log atomicity) lives here against the
//! engine primitives.

use chrono::Utc;
use engram_core::error::{Error, Result};
use engram_core::{DeltaResponse, PushRequest, PushResponse, StagedChange};
use tracing::{debug, info};

use crate::engine::StoreEngine;
use crate::replay::SqliteReplayStore;

/// Result of executing a push: the response, the exact bytes cached for
/// idempotent replay, and whether this call was such a replay.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub response: PushResponse,
    pub body: Vec<u8>,
    pub idempotent_replay: bool,
}

/// Execute a push against a store.
///
/// ```text
/// validate shape → check idempotency → check schema → plugin validate
///     → begin tx → plugin replay → append change-log batch
///     → cache response → commit
/// ```
///
/// A replayed `push_id` returns the originally cached bytes verbatim,
/// regardless of the new request's entries. A failed push caches
/// nothing.
pub async fn execute_push(
    engine: &StoreEngine,
    request: &PushRequest,
    max_entries: usize,
) -> Result<PushOutcome> {
    if request.push_id.trim().is_empty() {
        return Err(Error::invalid_input("push_id is required"));
    }
    if request.source_id.trim().is_empty() {
        return Err(Error::invalid_input("source_id is required"));
    }
    if request.schema_version < 1 {
        return Err(Error::invalid_input("schema_version must be >= 1"));
    }
    if request.entries.len() > max_entries {
        return Err(Error::invalid_input(format!(
            "push exceeds {max_entries} entries"
        )));
    }

    if let Some(body) = engine.check_push_idempotency(&request.push_id).await? {
        let response: PushResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::storage(format!("Corrupt cached push response: {e}")))?;
        debug!(
            store = %engine.store_id(),
            push_id = %request.push_id,
            "replaying cached push response"
        );
        return Ok(PushOutcome {
            response,
            body,
            idempotent_replay: true,
        });
    }

    let server_version = engine.schema_version().await?;
    if request.schema_version > server_version {
        return Err(Error::SchemaMismatch {
            client_version: request.schema_version,
            server_version,
        });
    }

    let plugin = engine.plugin().clone();
    let ordered = plugin
        .validate_push(&request.entries)
        .map_err(Error::PushValidation)?;

    let now = Utc::now();
    let mut wtx = engine.begin_write().await?;

    // Re-check under the writer lock: a concurrent push with the same
    // push_id may have committed between the first check and here.
    if let Some(body) = StoreEngine::check_push_idempotency_in(wtx.conn(), &request.push_id).await?
    {
        wtx.rollback().await?;
        let response: PushResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::storage(format!("Corrupt cached push response: {e}")))?;
        return Ok(PushOutcome {
            response,
            body,
            idempotent_replay: true,
        });
    }

    {
        let mut replay_store =
            SqliteReplayStore::new(wtx.conn(), plugin.table_order(), now);
        plugin.on_replay(&mut replay_store, &ordered).await?;
    }

    let staged: Vec<StagedChange> = ordered
        .iter()
        .map(|entry| StagedChange::from_push_entry(entry, &request.source_id, now))
        .collect();
    let sequences = StoreEngine::append_change_log_batch(wtx.conn(), &staged).await?;

    let remote_sequence = match sequences.iter().max() {
        Some(max) => *max,
        None => StoreEngine::latest_sequence_in(wtx.conn()).await?,
    };
    let response = PushResponse {
        accepted: ordered.len(),
        remote_sequence,
    };
    let body = serde_json::to_vec(&response)
        .map_err(|e| Error::storage(format!("Failed to serialize push response: {e}")))?;

    StoreEngine::record_push_idempotency(
        wtx.conn(),
        &request.push_id,
        engine.store_id().as_str(),
        &body,
        engine.idempotency_ttl(),
    )
    .await?;

    wtx.commit().await?;

    info!(
        store = %engine.store_id(),
        push_id = %request.push_id,
        accepted = response.accepted,
        remote_sequence = response.remote_sequence,
        "push committed"
    );
    Ok(PushOutcome {
        response,
        body,
        idempotent_replay: false,
    })
}

/// Execute a delta read: log entries strictly after `after`, ascending,
/// up to `limit`.
pub async fn execute_delta(engine: &StoreEngine, after: i64, limit: i64) -> Result<DeltaResponse> {
    if after < 0 {
        return Err(Error::invalid_input("after must be >= 0"));
    }
    if limit < 1 {
        return Err(Error::invalid_input("limit must be >= 1"));
    }

    let horizon = engine.compaction_horizon().await?;
    if after < horizon {
        return Err(Error::CompactedLog {
            requested: after,
            horizon,
        });
    }

    let entries = engine.get_change_log_after(after, limit).await?;
    let latest_sequence = engine.latest_sequence().await?;
    let last_sequence = entries.last().map(|e| e.sequence).unwrap_or(after);
    let has_more = entries.len() as i64 == limit && last_sequence < latest_sequence;

    Ok(DeltaResponse {
        entries,
        last_sequence,
        latest_sequence,
        has_more,
    })
}
