//! Bearer authentication middleware.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::problem::ApiError;
use crate::AppState;

/// Require a bearer token on the wrapped routes.
///
/// The comparison is constant-time and the 401 body never hints at the
/// expected token. When no key is configured the check is disabled
/// (development mode); the binary warns about this at startup.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.server.api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let authorized = presented
        .map(|token| token.as_bytes().ct_eq(expected.as_bytes()).into())
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "rejected unauthenticated request");
        ApiError::unauthorized(request.uri().path()).into_response()
    }
}
