//! Multi-tenant store registry.
//!
//! Maps hierarchical store ids to open engines. Lookup is the hot path:
//! a dashmap hit never takes a lock that another id's lookup contends
//! on. Opening is the cold path and serialises per id only.

use dashmap::DashMap;
use engram_core::config::StorageConfig;
use engram_core::error::{Error, Result};
use engram_core::{StoreId, StoreInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::{meta_keys, StoreEngine, STORE_DB_FILE};
use crate::plugin::PluginRegistry;

/// Store type used when the default store is created implicitly.
const DEFAULT_STORE_TYPE: &str = "recall";

pub struct StoreManager {
    root: PathBuf,
    config: StorageConfig,
    registry: Arc<PluginRegistry>,
    engines: DashMap<String, Arc<StoreEngine>>,
    open_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StoreManager {
    pub fn new(config: StorageConfig, registry: Arc<PluginRegistry>) -> Self {
        Self {
            root: config.data_dir.clone(),
            config,
            registry,
            engines: DashMap::new(),
            open_locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    fn store_db_path(&self, id: &StoreId) -> PathBuf {
        StoreEngine::store_dir(&self.root, id).join(STORE_DB_FILE)
    }

    fn open_lock(&self, id: &StoreId) -> Arc<Mutex<()>> {
        self.open_locks
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a new store.
    ///
    /// Rejects ids that already exist (open engine or directory on
    /// disk). The plugin named by `store_type` supplies the domain
    /// migrations.
    pub async fn create(
        &self,
        id: &StoreId,
        store_type: &str,
        description: Option<&str>,
    ) -> Result<Arc<StoreEngine>> {
        let plugin = self.registry.get(store_type).ok_or_else(|| {
            Error::invalid_input(format!("unknown store type: {store_type}"))
        })?;

        let lock = self.open_lock(id);
        let _guard = lock.lock().await;

        if self.engines.contains_key(id.as_str()) || self.store_db_path(id).exists() {
            return Err(Error::StoreExists(id.to_string()));
        }

        let store_dir = StoreEngine::store_dir(&self.root, id);
        let engine =
            Arc::new(StoreEngine::open(id.clone(), &store_dir, plugin, &self.config).await?);
        engine
            .set_metadata(meta_keys::STORE_TYPE, store_type)
            .await?;
        if let Some(description) = description {
            engine
                .set_metadata(meta_keys::STORE_DESCRIPTION, description)
                .await?;
        }

        self.engines.insert(id.as_str().to_string(), engine.clone());
        info!(store = %id, store_type, "store created");
        Ok(engine)
    }

    /// Fetch a store's engine, opening it lazily on first touch.
    pub async fn get(&self, id: &StoreId) -> Result<Arc<StoreEngine>> {
        if let Some(engine) = self.engines.get(id.as_str()) {
            return Ok(engine.clone());
        }

        let lock = self.open_lock(id);
        let _guard = lock.lock().await;

        // Another caller may have opened it while we waited.
        if let Some(engine) = self.engines.get(id.as_str()) {
            return Ok(engine.clone());
        }

        let db_path = self.store_db_path(id);
        if !db_path.exists() {
            return Err(Error::not_found("store", id.to_string()));
        }

        let store_type = read_store_type(&db_path).await?;
        let plugin = self.registry.get(&store_type).ok_or_else(|| {
            Error::storage(format!(
                "store '{id}' has unknown type '{store_type}' on disk"
            ))
        })?;

        let store_dir = StoreEngine::store_dir(&self.root, id);
        let engine =
            Arc::new(StoreEngine::open(id.clone(), &store_dir, plugin, &self.config).await?);
        self.engines.insert(id.as_str().to_string(), engine.clone());
        Ok(engine)
    }

    /// The store with id `default`, created on first touch.
    pub async fn get_or_create_default(&self) -> Result<Arc<StoreEngine>> {
        let id = StoreId::default_store();
        match self.get(&id).await {
            Ok(engine) => Ok(engine),
            Err(Error::NotFound { .. }) => {
                match self.create(&id, DEFAULT_STORE_TYPE, Some("Default store")).await {
                    Ok(engine) => Ok(engine),
                    // Lost a create race; the store exists now.
                    Err(Error::StoreExists(_)) => self.get(&id).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// All known stores (open or on disk), sorted by id ascending.
    pub async fn list(&self) -> Result<Vec<StoreInfo>> {
        let mut ids = Vec::new();
        if self.root.exists() {
            collect_store_ids(&self.root, &self.root, 0, &mut ids)?;
        }
        ids.sort();

        let mut stores = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store_info(&id).await {
                Ok(info) => stores.push(info),
                Err(e) => warn!(store = %id, "skipping unreadable store: {e}"),
            }
        }
        Ok(stores)
    }

    /// Details of one store.
    pub async fn store_info(&self, id: &StoreId) -> Result<StoreInfo> {
        let engine = self.get(id).await?;
        let store_type = engine
            .get_metadata(meta_keys::STORE_TYPE)
            .await?
            .unwrap_or_else(|| DEFAULT_STORE_TYPE.to_string());
        let description = engine.get_metadata(meta_keys::STORE_DESCRIPTION).await?;

        Ok(StoreInfo {
            store_id: id.to_string(),
            store_type,
            description,
            schema_version: engine.schema_version().await?,
            latest_sequence: engine.latest_sequence().await?,
            lore_count: engine.lore_count().await?,
        })
    }

    /// Delete a store: close its engine and remove its directory.
    ///
    /// The default store is protected.
    pub async fn delete(&self, id: &StoreId) -> Result<()> {
        if id.is_default() {
            return Err(Error::invalid_input("the default store cannot be deleted"));
        }

        let lock = self.open_lock(id);
        let _guard = lock.lock().await;

        if let Some((_, engine)) = self.engines.remove(id.as_str()) {
            engine.close().await;
        }

        let store_dir = StoreEngine::store_dir(&self.root, id);
        if !store_dir.join(STORE_DB_FILE).exists() {
            return Err(Error::not_found("store", id.to_string()));
        }
        tokio::fs::remove_dir_all(&store_dir).await?;
        info!(store = %id, "store deleted");
        Ok(())
    }

    /// Gracefully close every open engine.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, engine)) = self.engines.remove(&id) {
                engine.close().await;
            }
        }
    }

    /// Engines currently open, for background tasks that sweep stores.
    pub fn open_engines(&self) -> Vec<Arc<StoreEngine>> {
        self.engines.iter().map(|e| e.value().clone()).collect()
    }
}

/// Read a store's recorded type without running migrations, for lazy
/// opening.
async fn read_store_type(db_path: &Path) -> Result<String> {
    use sqlx::ConnectOptions;
    let mut conn = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true)
        .connect()
        .await
        .map_err(|e| Error::storage(format!("Failed to inspect store: {e}")))?;
    let row: Option<(String,)> =
        sqlx::query_as("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(meta_keys::STORE_TYPE)
            .fetch_optional(&mut conn)
            .await
            .map_err(|e| Error::storage(format!("Failed to read store type: {e}")))?;
    Ok(row
        .map(|(value,)| value)
        .unwrap_or_else(|| DEFAULT_STORE_TYPE.to_string()))
}

/// Recursively collect ids of directories containing a store database,
/// up to the maximum id depth.
fn collect_store_ids(
    root: &Path,
    dir: &Path,
    depth: usize,
    out: &mut Vec<StoreId>,
) -> Result<()> {
    if depth >= engram_core::store_id::MAX_STORE_ID_SEGMENTS {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if path.join(STORE_DB_FILE).exists() {
            if let Ok(relative) = path.strip_prefix(root) {
                let raw = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                match StoreId::parse(&raw) {
                    Ok(id) => out.push(id),
                    Err(_) => warn!("ignoring store directory with invalid id: {raw}"),
                }
            }
        }
        collect_store_ids(root, &path, depth + 1, out)?;
    }
    Ok(())
}
