//! Sync protocol endpoints: idempotent push and paginated delta.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use engram_core::{DeltaResponse, PushRequest};
use engram_storage::{execute_delta, execute_push};
use serde::Deserialize;

use super::store_engine;
use crate::problem::{ApiError, OrProblem};
use crate::AppState;

/// Response header marking an idempotent replay of a cached push.
pub const IDEMPOTENT_REPLAY_HEADER: &str = "X-Idempotent-Replay";

/// POST /api/v1/stores/{id}/sync/push
pub async fn push_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let instance = uri.path().to_string();
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;
    let engine = store_engine(&state, &raw_id, &instance).await?;

    let outcome = execute_push(&engine, &request, state.config.server.max_push_entries)
        .await
        .or_problem(&instance)?;

    // The cached bytes are returned verbatim so replays are
    // byte-for-byte identical to the original response.
    let mut response = Response::builder()
        .status(200)
        .header(header::CONTENT_TYPE, "application/json");
    if outcome.idempotent_replay {
        response = response.header(IDEMPOTENT_REPLAY_HEADER, "true");
    }
    response
        .body(axum::body::Body::from(outcome.body))
        .map_err(|_| ApiError::internal(&instance))
}

#[derive(Debug, Deserialize)]
pub struct DeltaParams {
    after: Option<i64>,
    limit: Option<i64>,
}

/// GET /api/v1/stores/{id}/sync/delta?after=<int>&limit=<int>
pub async fn delta_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
    params: Result<Query<DeltaParams>, QueryRejection>,
) -> Result<Json<DeltaResponse>, ApiError> {
    let instance = uri.path().to_string();
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;

    let Some(after) = params.after else {
        return Err(ApiError::bad_request(
            "query parameter 'after' is required",
            &instance,
        ));
    };
    if after < 0 {
        return Err(ApiError::bad_request("'after' must be >= 0", &instance));
    }

    let limit = params
        .limit
        .unwrap_or(state.config.server.delta_default_limit)
        .min(state.config.server.delta_max_limit);
    if limit < 1 {
        return Err(ApiError::bad_request("'limit' must be >= 1", &instance));
    }

    let engine = store_engine(&state, &raw_id, &instance).await?;
    let delta = execute_delta(&engine, after, limit)
        .await
        .or_problem(&instance)?;
    Ok(Json(delta))
}
