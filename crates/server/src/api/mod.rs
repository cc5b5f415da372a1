//! HTTP handlers for the engram API surface.

mod health;
mod lore;
mod snapshot;
mod stores;
mod sync;

pub use health::{health_handler, stats_handler};
pub use lore::{
    delete_lore_handler, feedback_handler, get_lore_handler, ingest_handler, search_lore_handler,
};
pub use snapshot::snapshot_handler;
pub use stores::{
    create_store_handler, delete_store_handler, get_store_handler, list_stores_handler,
};
pub use sync::{delta_handler, push_handler, IDEMPOTENT_REPLAY_HEADER};

use engram_core::StoreId;
use engram_storage::StoreEngine;
use std::sync::Arc;

use crate::problem::{ApiError, OrProblem};
use crate::AppState;

/// Parse a path store id and fetch its engine.
pub(crate) async fn store_engine(
    state: &AppState,
    raw_id: &str,
    instance: &str,
) -> Result<Arc<StoreEngine>, ApiError> {
    let id = StoreId::parse(raw_id).map_err(|e| ApiError::from_core(e, instance))?;
    state.manager.get(&id).await.or_problem(instance)
}
