//! Change-log records.
//!
//! Every mutation in a store appends a record here, inside the same
//! transaction that touches the domain table. The log is append-only with
//! a dense per-store sequence, which makes it both the sync feed and the
//! audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Kind of mutation captured by a change-log record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeOperation {
    Upsert,
    Delete,
}

/// A committed change-log record as served by the delta endpoint.
///
/// `payload` is the canonical JSON of the domain row for `upsert` and
/// absent for `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub sequence: i64,
    pub table_name: String,
    pub entity_id: String,
    pub operation: ChangeOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub source_id: String,
    pub created_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// A change-log entry as submitted by a client push, before the server
/// assigns its own sequence.
///
/// `sequence` is the client's local sequence; it is echoed back in
/// validation errors but has no meaning server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEntry {
    pub sequence: i64,
    pub table_name: String,
    pub entity_id: String,
    pub operation: ChangeOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A change-log entry staged for append: a validated push entry stamped
/// with the writer and arrival time.
#[derive(Debug, Clone)]
pub struct StagedChange {
    pub table_name: String,
    pub entity_id: String,
    pub operation: ChangeOperation,
    pub payload: Option<serde_json::Value>,
    pub source_id: String,
    pub created_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl StagedChange {
    /// Stamp a push entry with its writer and arrival time.
    pub fn from_push_entry(entry: &PushEntry, source_id: &str, received_at: DateTime<Utc>) -> Self {
        Self {
            table_name: entry.table_name.clone(),
            entity_id: entry.entity_id.clone(),
            operation: entry.operation,
            payload: entry.payload.clone(),
            source_id: source_id.to_string(),
            created_at: entry.created_at,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn delete_entries_omit_payload() {
        let entry = ChangeLogEntry {
            sequence: 3,
            table_name: "lore".to_string(),
            entity_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            operation: ChangeOperation::Delete,
            payload: None,
            source_id: "src-1".to_string(),
            created_at: Utc::now(),
            received_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("payload").is_none());
        assert_eq!(json["operation"], "delete");
    }

    #[test]
    fn operation_round_trips() {
        let op: ChangeOperation = serde_json::from_str("\"upsert\"").unwrap();
        assert_eq!(op, ChangeOperation::Upsert);
        assert_eq!(serde_json::to_string(&op).unwrap(), "\"upsert\"");
    }
}
