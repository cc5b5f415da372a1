//! The `recall` domain plugin: a single `lore` table of experiential
//! knowledge entries.

use async_trait::async_trait;
use engram_core::error::Result;
use engram_core::{is_valid_lore_id, ChangeOperation, LoreEntry, PushEntry, PushEntryError};
use std::sync::Arc;

use crate::plugin::{sort_by_table_order, DomainPlugin, PluginMigration, PluginRegistry};
use crate::replay::ReplayStore;

const LORE_TABLE: &str = "lore";
const TABLE_ORDER: &[&str] = &[LORE_TABLE];

/// Plugin for stores holding lore entries.
#[derive(Debug, Default)]
pub struct RecallPlugin;

impl RecallPlugin {
    pub fn new() -> Self {
        Self
    }
}

fn entry_error(entry: &PushEntry, code: &str, message: impl Into<String>) -> PushEntryError {
    PushEntryError {
        sequence: entry.sequence,
        table_name: entry.table_name.clone(),
        entity_id: entry.entity_id.clone(),
        code: code.to_string(),
        message: message.into(),
    }
}

fn validate_upsert_payload(entry: &PushEntry) -> Option<PushEntryError> {
    let Some(payload) = &entry.payload else {
        return Some(entry_error(
            entry,
            "missing_payload",
            "upsert entries require a payload",
        ));
    };

    let lore: LoreEntry = match serde_json::from_value(payload.clone()) {
        Ok(lore) => lore,
        Err(e) => {
            return Some(entry_error(
                entry,
                "invalid_payload",
                format!("payload does not decode as a lore row: {e}"),
            ));
        }
    };

    if lore.id != entry.entity_id {
        return Some(entry_error(
            entry,
            "entity_id_mismatch",
            format!("payload id '{}' does not match entity_id", lore.id),
        ));
    }
    if lore.content.trim().is_empty() {
        return Some(entry_error(entry, "invalid_field", "content must be non-empty"));
    }
    if !(0.0..=1.0).contains(&lore.confidence) {
        return Some(entry_error(
            entry,
            "invalid_field",
            "confidence must be within [0.0, 1.0]",
        ));
    }
    if lore.created_at > lore.updated_at {
        return Some(entry_error(
            entry,
            "invalid_field",
            "created_at must not be after updated_at",
        ));
    }

    None
}

#[async_trait]
impl DomainPlugin for RecallPlugin {
    fn type_name(&self) -> &'static str {
        "recall"
    }

    fn migrations(&self) -> Vec<PluginMigration> {
        vec![PluginMigration {
            version: 2,
            description: "lore table",
            sql: include_str!("../migrations_recall/0002_lore.sql"),
        }]
    }

    fn table_order(&self) -> &'static [&'static str] {
        TABLE_ORDER
    }

    fn validate_push(
        &self,
        entries: &[PushEntry],
    ) -> std::result::Result<Vec<PushEntry>, Vec<PushEntryError>> {
        let mut errors = Vec::new();

        for entry in entries {
            if entry.table_name != LORE_TABLE {
                errors.push(entry_error(
                    entry,
                    "unknown_table",
                    format!("table '{}' is not part of the recall schema", entry.table_name),
                ));
                continue;
            }
            if !is_valid_lore_id(&entry.entity_id) {
                errors.push(entry_error(
                    entry,
                    "invalid_entity_id",
                    "entity_id is not a well-formed lore id",
                ));
                continue;
            }
            match entry.operation {
                ChangeOperation::Upsert => {
                    if let Some(error) = validate_upsert_payload(entry) {
                        errors.push(error);
                    }
                }
                ChangeOperation::Delete => {
                    if entry.payload.is_some() {
                        errors.push(entry_error(
                            entry,
                            "unexpected_payload",
                            "delete entries must not carry a payload",
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(sort_by_table_order(entries, self.table_order()))
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
            match entry.operation {
                ChangeOperation::Upsert => {
                    let payload = entry.payload.as_ref().ok_or_else(|| {
                        engram_core::Error::storage("validated upsert lost its payload")
                    })?;
                    store.upsert_row(LORE_TABLE, &entry.entity_id, payload).await?;
                    if payload.get("embedding").is_none() {
                        store.queue_embedding(LORE_TABLE, &entry.entity_id).await?;
                    }
                }
                ChangeOperation::Delete => {
                    store.delete_row(LORE_TABLE, &entry.entity_id).await?;
                }
            }
        }
        Ok(())
    }
}

/// Build the default registry with the built-in plugins registered.
pub fn default_registry() -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(RecallPlugin::new()));
    Arc::new(registry)
}
