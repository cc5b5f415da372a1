//! Store management endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use engram_core::{
    CreateStoreRequest, Error, FieldError, ListStoresResponse, StoreId, StoreInfo,
};
use serde::Deserialize;

use crate::problem::{ApiError, OrProblem};
use crate::rate_limit::check_delete_rate;
use crate::AppState;

/// GET /api/v1/stores
pub async fn list_stores_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<ListStoresResponse>, ApiError> {
    let stores = state.manager.list().await.or_problem(uri.path())?;
    Ok(Json(ListStoresResponse { stores }))
}

/// POST /api/v1/stores
pub async fn create_store_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    body: Result<Json<CreateStoreRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StoreInfo>), ApiError> {
    let instance = uri.path();
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.to_string(), instance))?;

    // A malformed id in the body is a field validation failure, not a
    // malformed request.
    let id = StoreId::parse(&request.store_id).map_err(|e| {
        ApiError::from_core(
            Error::Validation(vec![FieldError::new("store_id", e.to_string())]),
            instance,
        )
    })?;

    state
        .manager
        .create(&id, &request.store_type, request.description.as_deref())
        .await
        .or_problem(instance)?;
    let info = state.manager.store_info(&id).await.or_problem(instance)?;
    Ok((StatusCode::CREATED, Json(info)))
}

/// GET /api/v1/stores/{id}
pub async fn get_store_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
) -> Result<Json<StoreInfo>, ApiError> {
    let instance = uri.path();
    let id = StoreId::parse(&raw_id).map_err(|e| ApiError::from_core(e, instance))?;
    let info = state.manager.store_info(&id).await.or_problem(instance)?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
pub struct DeleteStoreParams {
    #[serde(default)]
    confirm: Option<String>,
}

/// DELETE /api/v1/stores/{id}?confirm=true
pub async fn delete_store_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
    Query(params): Query<DeleteStoreParams>,
) -> Result<StatusCode, ApiError> {
    let instance = uri.path();
    check_delete_rate(&state.delete_limiter, instance)?;

    // The default store is undeletable unconditionally, so this guard
    // comes before the confirm check.
    let id = StoreId::parse(&raw_id).map_err(|e| ApiError::from_core(e, instance))?;
    if id.is_default() {
        return Err(ApiError::forbidden(
            "the default store cannot be deleted",
            instance,
        ));
    }

    if params.confirm.as_deref() != Some("true") {
        return Err(ApiError::bad_request(
            "store deletion requires confirm=true",
            instance,
        ));
    }

    state.manager.delete(&id).await.or_problem(instance)?;
    Ok(StatusCode::NO_CONTENT)
}
