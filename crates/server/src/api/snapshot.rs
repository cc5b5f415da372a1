//! Snapshot bootstrap endpoint.

use axum::extract::{OriginalUri, Path, State};
use axum::http::header;
use axum::response::Response;
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::store_engine;
use crate::problem::{ApiError, OrProblem};
use crate::AppState;

/// GET /api/v1/stores/{id}/sync/snapshot
///
/// Prefers a presigned object-store redirect when an uploader is
/// configured; any uploader error falls back to streaming the local
/// file. A store with no snapshot yet returns 503 with `Retry-After`.
pub async fn snapshot_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let instance = uri.path().to_string();
    let engine = store_engine(&state, &raw_id, &instance).await?;

    let snapshot_path = engine.snapshots().current_path();
    if !snapshot_path.exists() {
        return Err(ApiError::from_core(
            engram_core::Error::SnapshotNotAvailable,
            &instance,
        ));
    }

    if let Some(uploader) = &state.uploader {
        match uploader.presigned_url(engine.store_id(), &snapshot_path).await {
            Ok(url) => {
                return Response::builder()
                    .status(302)
                    .header(header::LOCATION, url)
                    .body(axum::body::Body::empty())
                    .map_err(|_| ApiError::internal(&instance));
            }
            Err(e) => {
                warn!(
                    store = %engine.store_id(),
                    "snapshot presign failed, streaming locally: {e}"
                );
            }
        }
    }

    let (file, len) = engine.snapshots().open_snapshot().await.or_problem(&instance)?;
    Response::builder()
        .status(200)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .body(axum::body::Body::from_stream(ReaderStream::new(file)))
        .map_err(|_| ApiError::internal(&instance))
}
