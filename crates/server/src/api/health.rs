//! Liveness and statistics endpoints (unauthenticated).

use axum::extract::{OriginalUri, State};
use axum::Json;
use engram_core::{ExtendedStats, HealthResponse};

use crate::problem::{ApiError, OrProblem};
use crate::AppState;

/// GET /api/v1/health
#[axum::debug_handler]
pub async fn health_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<HealthResponse>, ApiError> {
    let instance = uri.path();
    let engine = state
        .manager
        .get_or_create_default()
        .await
        .or_problem(instance)?;

    let embedding_model = state
        .provider
        .as_ref()
        .map(|p| p.model_name().to_string())
        .unwrap_or_else(|| "none".to_string());

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: engram_core::VERSION.to_string(),
        embedding_model,
        lore_count: engine.lore_count().await.or_problem(instance)?,
        last_snapshot: engine.last_snapshot_at().await.or_problem(instance)?,
    }))
}

/// GET /api/v1/stats
pub async fn stats_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<ExtendedStats>, ApiError> {
    let instance = uri.path();
    let engine = state
        .manager
        .get_or_create_default()
        .await
        .or_problem(instance)?;
    Ok(Json(engine.extended_stats().await.or_problem(instance)?))
}
