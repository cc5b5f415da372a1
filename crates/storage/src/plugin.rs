//! Domain plugin interface.
//!
//! A plugin declares the shape of a store's domain tables and how pushed
//! change-log entries are validated and replayed into them. The sync
//! engine never names a domain table itself; everything it knows about
//! the schema comes through this trait.

use async_trait::async_trait;
use engram_core::error::Result;
use engram_core::{PushEntry, PushEntryError};
use std::collections::HashMap;
use std::sync::Arc;

use crate::replay::ReplayStore;

/// One schema migration bundled with a plugin.
///
/// Versions are global to the store: the base sync-engine schema is
/// version 1, so plugin migrations start at 2. The highest applied
/// version becomes the store's `schema_version`.
#[derive(Debug, Clone)]
pub struct PluginMigration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// Declaration of a domain's tables and replay behaviour.
///
/// Conventions required of plugin tables so the generic replay store can
/// write them: the primary key column is `id`, soft deletion uses a
/// nullable `deleted_at` column alongside `updated_at`, and tables that
/// participate in the embedding pipeline carry `embedding` and
/// `embedding_status` columns.
#[async_trait]
pub trait DomainPlugin: Send + Sync {
    /// Stable plugin name, recorded as the store's type (e.g. `recall`).
    fn type_name(&self) -> &'static str;

    /// Ordered schema migrations applied on top of the base schema.
    fn migrations(&self) -> Vec<PluginMigration>;

    /// Tables in foreign-key-safe order: parents before children. The
    /// sync engine sorts incoming push entries by this order before
    /// replay.
    fn table_order(&self) -> &'static [&'static str];

    /// Validate a push batch.
    ///
    /// All-or-nothing: returns either the full entry list re-sorted into
    /// [`table_order`](Self::table_order) (client order is preserved
    /// within a table), or every per-entry error found.
    fn validate_push(
        &self,
        entries: &[PushEntry],
    ) -> std::result::Result<Vec<PushEntry>, Vec<PushEntryError>>;

    /// Replay validated, ordered entries into the domain tables.
    ///
    /// `store` is bound to the transaction that will also append the
    /// change-log batch; writes outside it are impossible by
    /// construction.
    async fn on_replay(
        &self,
        store: &mut dyn ReplayStore,
        entries: &[PushEntry],
    ) -> Result<()>;
}

/// Process-wide registry mapping plugin type names to implementations.
///
/// Built once at startup, then frozen behind an `Arc`.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn DomainPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own `type_name`.
    pub fn register(&mut self, plugin: Arc<dyn DomainPlugin>) {
        self.plugins.insert(plugin.type_name(), plugin);
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn DomainPlugin>> {
        self.plugins.get(type_name).cloned()
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.plugins.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Sort entries into the plugin's table order, preserving the client's
/// relative order within each table. Entries for unknown tables are left
/// at the end; validation has already rejected them by the time this
/// runs.
pub fn sort_by_table_order(entries: &[PushEntry], order: &[&str]) -> Vec<PushEntry> {
    let rank = |table: &str| -> usize {
        order
            .iter()
            .position(|t| *t == table)
            .unwrap_or(order.len())
    };
    let mut sorted: Vec<PushEntry> = entries.to_vec();
    sorted.sort_by_key(|e| rank(&e.table_name));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_core::ChangeOperation;

    fn entry(table: &str, id: &str) -> PushEntry {
        PushEntry {
            sequence: 0,
            table_name: table.to_string(),
            entity_id: id.to_string(),
            operation: ChangeOperation::Delete,
            payload: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sort_is_stable_within_a_table() {
        let entries = vec![
            entry("child", "c1"),
            entry("parent", "p1"),
            entry("child", "c2"),
        ];
        let sorted = sort_by_table_order(&entries, &["parent", "child"]);
        let ids: Vec<&str> = sorted.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "c1", "c2"]);
    }
}
