//! Domain endpoints: ingest, feedback, and entry deletion.

use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, Path, State};
use axum::http::StatusCode;
use axum::Json;
use engram_core::{
    Error, FeedbackRequest, FeedbackResponse, IngestRequest, IngestResponse, LoreEntry,
    SearchMatch, SearchRequest, SearchResponse,
};

use super::store_engine;
use crate::problem::{ApiError, OrProblem};
use crate::rate_limit::check_delete_rate;
use crate::AppState;

/// POST /api/v1/stores/{id}/lore
pub async fn ingest_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let instance = uri.path().to_string();
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;
    if request.source_id.trim().is_empty() {
        return Err(ApiError::bad_request("source_id is required", &instance));
    }

    let engine = store_engine(&state, &raw_id, &instance).await?;
    let response = engine
        .ingest(&request, state.provider.as_deref(), &state.config.dedup)
        .await
        .or_problem(&instance)?;
    Ok(Json(response))
}

/// GET /api/v1/stores/{id}/lore/{lore_id}
pub async fn get_lore_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path((raw_id, lore_id)): Path<(String, String)>,
) -> Result<Json<LoreEntry>, ApiError> {
    let instance = uri.path().to_string();
    let engine = store_engine(&state, &raw_id, &instance).await?;
    Ok(Json(engine.get(&lore_id).await.or_problem(&instance)?))
}

/// POST /api/v1/stores/{id}/lore/search
///
/// Embeds the query text and returns same-category entries at or above
/// the similarity threshold, best first.
pub async fn search_lore_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let instance = uri.path().to_string();
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query is required", &instance));
    }

    let Some(provider) = state.provider.as_deref() else {
        return Err(ApiError::from_core(
            Error::EmbeddingUnavailable("no embedding provider configured".to_string()),
            &instance,
        ));
    };

    let vectors = provider
        .embed(vec![request.query.clone()])
        .await
        .map_err(|e| ApiError::from_core(e.into(), &instance))?;
    let Some(Some(vector)) = vectors.into_iter().next() else {
        return Err(ApiError::bad_request(
            "query could not be embedded",
            &instance,
        ));
    };

    let engine = store_engine(&state, &raw_id, &instance).await?;
    let threshold = request.threshold.unwrap_or(state.config.dedup.threshold);
    let matches = engine
        .find_similar(&vector, request.category, threshold, request.limit)
        .await
        .or_problem(&instance)?;

    Ok(Json(SearchResponse {
        results: matches
            .into_iter()
            .map(|(lore, similarity)| SearchMatch { lore, similarity })
            .collect(),
    }))
}

/// POST /api/v1/stores/{id}/feedback
pub async fn feedback_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
    body: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let instance = uri.path().to_string();
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;

    let engine = store_engine(&state, &raw_id, &instance).await?;
    let source_id = request.source_id.as_deref().unwrap_or("api");
    let response = engine
        .record_feedback(&request.feedback, source_id)
        .await
        .or_problem(&instance)?;
    Ok(Json(response))
}

/// DELETE /api/v1/stores/{id}/lore/{lore_id}
pub async fn delete_lore_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path((raw_id, lore_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let instance = uri.path().to_string();
    check_delete_rate(&state.delete_limiter, &instance)?;

    let engine = store_engine(&state, &raw_id, &instance).await?;
    engine.delete(&lore_id, "api").await.or_problem(&instance)?;
    Ok(StatusCode::NO_CONTENT)
}
