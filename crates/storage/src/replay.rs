//! Transaction-scoped replay interface.
//!
//! `on_replay` implementations receive a [`ReplayStore`] bound to the
//! push transaction, never the engine itself, so a plugin cannot write
//! outside the atomic replay + change-log step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engram_core::error::{Error, Result};
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::error::StorageError;
use crate::types::encode_embedding;

/// Row operations a plugin may perform during replay.
///
/// `payload` objects are canonical rows: keys are column names. Values
/// map to SQLite types directly, with two generic rules: an array of
/// numbers is stored as a little-endian f32 BLOB (vectors), and any other
/// array or object is stored as JSON text.
#[async_trait]
pub trait ReplayStore: Send {
    /// Insert or update a row by primary key (`id` column by convention).
    async fn upsert_row(&mut self, table: &str, entity_id: &str, payload: &Value) -> Result<()>;

    /// Soft-delete a row. Re-deleting is a no-op.
    async fn delete_row(&mut self, table: &str, entity_id: &str) -> Result<()>;

    /// Mark a row pending for the embedding worker if it carries no
    /// vector yet.
    async fn queue_embedding(&mut self, table: &str, entity_id: &str) -> Result<()>;
}

/// The production [`ReplayStore`], wrapping the live push transaction.
pub struct SqliteReplayStore<'t> {
    conn: &'t mut SqliteConnection,
    allowed_tables: &'static [&'static str],
    now: DateTime<Utc>,
}

enum BindValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn bind_value_for(column: &str, value: &Value) -> Result<BindValue> {
    Ok(match value {
        Value::Null => BindValue::Null,
        Value::Bool(b) => BindValue::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                BindValue::Int(i)
            } else {
                BindValue::Real(n.as_f64().ok_or_else(|| {
                    Error::storage(format!("Unrepresentable number in column {column}"))
                })?)
            }
        }
        Value::String(s) => BindValue::Text(s.clone()),
        Value::Array(items) if items.iter().all(Value::is_number) && !items.is_empty() => {
            let mut vector = Vec::with_capacity(items.len());
            for item in items {
                vector.push(item.as_f64().ok_or_else(|| {
                    Error::storage(format!("Unrepresentable vector element in {column}"))
                })? as f32);
            }
            BindValue::Blob(encode_embedding(&vector))
        }
        other => BindValue::Text(serde_json::to_string(other).map_err(|e| {
            StorageError::SerializationError(format!("column {column}: {e}"))
        })?),
    })
}

impl<'t> SqliteReplayStore<'t> {
    pub fn new(
        conn: &'t mut SqliteConnection,
        allowed_tables: &'static [&'static str],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conn,
            allowed_tables,
            now,
        }
    }

    fn check_table(&self, table: &str) -> Result<()> {
        if self.allowed_tables.contains(&table) {
            Ok(())
        } else {
            Err(StorageError::UnknownTable(table.to_string()).into())
        }
    }
}

#[async_trait]
impl ReplayStore for SqliteReplayStore<'_> {
    async fn upsert_row(&mut self, table: &str, entity_id: &str, payload: &Value) -> Result<()> {
        self.check_table(table)?;

        let object = payload
            .as_object()
            .ok_or_else(|| Error::storage("Upsert payload must be a JSON object"))?;

        let mut columns: Vec<String> = Vec::with_capacity(object.len() + 1);
        let mut values: Vec<BindValue> = Vec::with_capacity(object.len() + 1);

        if !object.contains_key("id") {
            columns.push("id".to_string());
            values.push(BindValue::Text(entity_id.to_string()));
        }
        for (column, value) in object {
            if !is_safe_identifier(column) {
                return Err(Error::storage(format!(
                    "Unsafe column name in payload: {column}"
                )));
            }
            columns.push(column.clone());
            values.push(bind_value_for(column, value)?);
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let updates = columns
            .iter()
            .filter(|c| c.as_str() != "id")
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})
             ON CONFLICT(id) DO UPDATE SET {updates}",
            columns.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for value in values {
            query = match value {
                BindValue::Null => query.bind(None::<String>),
                BindValue::Int(i) => query.bind(i),
                BindValue::Real(r) => query.bind(r),
                BindValue::Text(t) => query.bind(t),
                BindValue::Blob(b) => query.bind(b),
            };
        }
        query
            .execute(&mut *self.conn)
            .await
            .map_err(|e| Error::storage(format!("Replay upsert into {table} failed: {e}")))?;

        Ok(())
    }

    async fn delete_row(&mut self, table: &str, entity_id: &str) -> Result<()> {
        self.check_table(table)?;

        let sql = format!(
            "UPDATE {table} SET deleted_at = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL"
        );
        sqlx::query(&sql)
            .bind(self.now)
            .bind(self.now)
            .bind(entity_id)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| Error::storage(format!("Replay delete in {table} failed: {e}")))?;

        Ok(())
    }

    async fn queue_embedding(&mut self, table: &str, entity_id: &str) -> Result<()> {
        self.check_table(table)?;

        let sql = format!(
            "UPDATE {table} SET embedding_status = 'pending'
             WHERE id = ? AND embedding IS NULL AND deleted_at IS NULL"
        );
        sqlx::query(&sql)
            .bind(entity_id)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| Error::storage(format!("Queueing embedding in {table} failed: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_safety() {
        assert!(is_safe_identifier("lore"));
        assert!(is_safe_identifier("validation_count"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("Lore"));
        assert!(!is_safe_identifier("drop table"));
        assert!(!is_safe_identifier("a;--"));
    }

    #[test]
    fn numeric_arrays_become_blobs() {
        let value = serde_json::json!([0.5, 1.0]);
        match bind_value_for("embedding", &value).unwrap() {
            BindValue::Blob(bytes) => assert_eq!(bytes.len(), 8),
            _ => panic!("expected blob"),
        }
    }

    #[test]
    fn string_arrays_become_json_text() {
        let value = serde_json::json!(["src-1", "src-2"]);
        match bind_value_for("sources", &value).unwrap() {
            BindValue::Text(text) => assert_eq!(text, r#"["src-1","src-2"]"#),
            _ => panic!("expected text"),
        }
    }
}
