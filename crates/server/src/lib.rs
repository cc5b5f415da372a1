//! REST API server for the engram lore store.
//!
//! Routes, authentication, rate limiting, and problem+json error
//! rendering live here; protocol semantics live in `engram-storage`.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod api;
pub mod auth;
pub mod problem;
pub mod rate_limit;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use engram_core::config::Config;
use engram_core::error::{Error, Result};
use engram_embeddings::EmbeddingProvider;
use engram_storage::{SnapshotUploader, StoreManager};
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::*;
use crate::rate_limit::{build_delete_limiter, DeleteRateLimiter};

pub use crate::api::IDEMPOTENT_REPLAY_HEADER;
pub use crate::problem::ApiError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<StoreManager>,
    pub provider: Option<Arc<dyn EmbeddingProvider>>,
    pub uploader: Option<Arc<dyn SnapshotUploader>>,
    pub config: Arc<Config>,
    pub delete_limiter: Arc<DeleteRateLimiter>,
}

impl AppState {
    pub fn new(
        manager: Arc<StoreManager>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        uploader: Option<Arc<dyn SnapshotUploader>>,
        config: Arc<Config>,
    ) -> Result<Self> {
        if config.server.api_key.is_none() {
            warn!("no api_key configured; authenticated routes are open");
        }
        let delete_limiter = Arc::new(build_delete_limiter(
            config.server.delete_rate_burst,
            config.server.delete_rate_refill_ms,
        )?);
        Ok(Self {
            manager,
            provider,
            uploader,
            config,
            delete_limiter,
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/stats", get(stats_handler))
        .with_state(state)
}

/// Render a caught panic as a generic problem+json 500; the stack is in
/// the logs, never in the response.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> axum::response::Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("handler panicked: {detail}");
    ApiError::internal("").into_response()
}

/// Bind and serve until the token is cancelled, draining in-flight
/// requests on shutdown.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind {addr}: {e}")))?;
    info!("listening on {addr}");

    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::with_context("server error", e))?;
    Ok(())
}
