//! Shared fixtures for storage integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use engram_core::config::StorageConfig;
use engram_core::error::Result;
use engram_core::{
    generate_lore_id, ChangeOperation, EmbeddingStatus, LoreCategory, LoreEntry, PushEntry,
    PushEntryError, PushRequest, StoreId,
};
use engram_storage::plugin::{sort_by_table_order, DomainPlugin, PluginMigration, PluginRegistry};
use engram_storage::replay::ReplayStore;
use engram_storage::{RecallPlugin, StoreEngine, StoreManager};
use std::path::Path;
use std::sync::Arc;

/// Entity id that makes [`TractPlugin`] fail mid-replay, for atomicity
/// tests.
pub const REPLAY_POISON_ID: &str = "boom";

/// A multi-table plugin mirroring a goal-tracking domain. Table order is
/// deliberately the reverse of what clients tend to send.
pub struct TractPlugin;

const TRACT_TABLES: &[&str] = &["goal", "csf", "fwu", "ic"];

#[async_trait]
impl DomainPlugin for TractPlugin {
    fn type_name(&self) -> &'static str {
        "tract"
    }

    fn migrations(&self) -> Vec<PluginMigration> {
        vec![PluginMigration {
            version: 2,
            description: "tract tables",
            sql: "CREATE TABLE goal (id TEXT PRIMARY KEY, name TEXT, updated_at TEXT, deleted_at TEXT);
                  CREATE TABLE csf (id TEXT PRIMARY KEY, name TEXT, updated_at TEXT, deleted_at TEXT);
                  CREATE TABLE fwu (id TEXT PRIMARY KEY, name TEXT, updated_at TEXT, deleted_at TEXT);
                  CREATE TABLE ic (id TEXT PRIMARY KEY, name TEXT, updated_at TEXT, deleted_at TEXT);",
        }]
    }

    fn table_order(&self) -> &'static [&'static str] {
        TRACT_TABLES
    }

    fn validate_push(
        &self,
        entries: &[PushEntry],
    ) -> std::result::Result<Vec<PushEntry>, Vec<PushEntryError>> {
        let mut errors = Vec::new();
        for entry in entries {
            if !TRACT_TABLES.contains(&entry.table_name.as_str()) {
                errors.push(PushEntryError {
                    sequence: entry.sequence,
                    table_name: entry.table_name.clone(),
                    entity_id: entry.entity_id.clone(),
                    code: "unknown_table".to_string(),
                    message: format!("table '{}' is not part of tract", entry.table_name),
                });
            }
        }
        if errors.is_empty() {
            Ok(sort_by_table_order(entries, TRACT_TABLES))
        } else {
            Err(errors)
        }
    }

    async fn on_replay(
        &self,
        store: &mut dyn ReplayStore,
        entries: &[PushEntry],
    ) -> Result<()> {
        for entry in entries {
            if entry.entity_id == REPLAY_POISON_ID {
                return Err(engram_core::Error::storage("poisoned replay entry"));
            }
            match entry.operation {
                ChangeOperation::Upsert => {
                    let payload = entry
                        .payload
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({ "name": entry.entity_id }));
                    store
                        .upsert_row(&entry.table_name, &entry.entity_id, &payload)
                        .await?;
                }
                ChangeOperation::Delete => {
                    store.delete_row(&entry.table_name, &entry.entity_id).await?;
                }
            }
        }
        Ok(())
    }
}

pub fn test_registry() -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(RecallPlugin::new()));
    registry.register(Arc::new(TractPlugin));
    Arc::new(registry)
}

pub fn test_config(root: &Path) -> StorageConfig {
    StorageConfig {
        data_dir: root.to_path_buf(),
        ..Default::default()
    }
}

pub fn test_manager(root: &Path) -> StoreManager {
    StoreManager::new(test_config(root), test_registry())
}

pub async fn open_recall_store(root: &Path, id: &str) -> Arc<StoreEngine> {
    let manager = test_manager(root);
    manager
        .create(&StoreId::parse(id).unwrap(), "recall", None)
        .await
        .unwrap()
}

/// A canonical lore row payload as a client would push it.
pub fn lore_payload(id: &str, content: &str) -> serde_json::Value {
    let now = Utc::now();
    serde_json::to_value(LoreEntry {
        id: id.to_string(),
        content: content.to_string(),
        context: None,
        category: LoreCategory::PatternOutcome,
        confidence: 0.7,
        embedding: None,
        embedding_status: EmbeddingStatus::Pending,
        source_id: "src-1".to_string(),
        sources: vec!["src-1".to_string()],
        validation_count: 0,
        last_validated_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
    .unwrap()
}

pub fn lore_upsert_entry(sequence: i64) -> PushEntry {
    let id = generate_lore_id();
    PushEntry {
        sequence,
        table_name: "lore".to_string(),
        entity_id: id.clone(),
        operation: ChangeOperation::Upsert,
        payload: Some(lore_payload(&id, &format!("pushed content {sequence}"))),
        created_at: Utc::now(),
    }
}

pub fn push_request(push_id: &str, entries: Vec<PushEntry>) -> PushRequest {
    PushRequest {
        push_id: push_id.to_string(),
        source_id: "client-a".to_string(),
        schema_version: 2,
        entries,
    }
}
