//! Wire models for the sync protocol and the domain HTTP surface.
//!
//! Everything here crosses a serialization boundary: request bodies,
//! response bodies, and the per-entry error shapes. Field names are
//! snake_case and timestamps are RFC 3339; collections always serialize
//! as `[]` rather than `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::change_log::{ChangeLogEntry, PushEntry};
use crate::lore::{FeedbackType, LoreDraft};

/// Body of `POST /stores/{id}/sync/push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub push_id: String,
    pub source_id: String,
    pub schema_version: i64,
    #[serde(default)]
    pub entries: Vec<PushEntry>,
}

/// Successful push response. `remote_sequence` is the highest change-log
/// sequence assigned to this push, or the store's latest sequence when the
/// push was empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub accepted: usize,
    pub remote_sequence: i64,
}

/// One rejected push entry. `sequence` echoes the client's local sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEntryError {
    pub sequence: i64,
    pub table_name: String,
    pub entity_id: String,
    pub code: String,
    pub message: String,
}

/// Body of `GET /stores/{id}/sync/delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaResponse {
    pub entries: Vec<ChangeLogEntry>,
    /// Highest sequence in `entries`, or the request's `after` when empty
    pub last_sequence: i64,
    /// The store's latest committed sequence at read time
    pub latest_sequence: i64,
    pub has_more: bool,
}

/// Body of `POST /stores/{id}/lore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_id: String,
    #[serde(default)]
    pub lore: Vec<LoreDraft>,
}

/// Per-entry ingest rejection; `index` locates the draft in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestError {
    pub index: usize,
    pub field: String,
    pub message: String,
}

/// Ingest is partially accepting: valid drafts proceed, invalid ones are
/// counted in `rejected` and detailed in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub merged: usize,
    pub rejected: usize,
    pub errors: Vec<IngestError>,
}

/// Body of `POST /stores/{id}/lore/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Text to embed and compare against stored entries
    pub query: String,
    pub category: crate::lore::LoreCategory,
    /// Minimum cosine similarity; defaults to the server's dedup
    /// threshold when absent
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One similarity match, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub lore: crate::lore::LoreEntry,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchMatch>,
}

/// Body of `POST /stores/{id}/feedback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    /// Writer recorded on the change-log records this feedback produces
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub feedback: Vec<FeedbackItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub lore_id: String,
    pub feedback_type: FeedbackType,
}

/// Outcome of one applied feedback item. `validation_count` is reported
/// only for `helpful` feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub lore_id: String,
    pub feedback_type: FeedbackType,
    pub confidence_before: f64,
    pub confidence_after: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_count: Option<i64>,
}

/// A feedback item that could not be applied (entry missing or deleted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFeedback {
    pub lore_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub results: Vec<FeedbackResult>,
    pub skipped: Vec<SkippedFeedback>,
}

/// Body of `POST /api/v1/stores`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStoreRequest {
    pub store_id: String,
    #[serde(rename = "type")]
    pub store_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A managed store as reported by the stores endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub store_id: String,
    #[serde(rename = "type")]
    pub store_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema_version: i64,
    pub latest_sequence: i64,
    pub lore_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListStoresResponse {
    pub stores: Vec<StoreInfo>,
}

/// Body of `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub embedding_model: String,
    pub lore_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<DateTime<Utc>>,
}

/// Basic per-store counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: i64,
    pub deleted: i64,
    pub by_category: BTreeMap<String, i64>,
    pub by_embedding_status: BTreeMap<String, i64>,
}

/// Confidence distribution: high ≥ 0.8, medium ≥ 0.5, low below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityBands {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

/// Body of `GET /api/v1/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedStats {
    #[serde(flatten)]
    pub base: StoreStats,
    pub quality_bands: QualityBands,
    pub validation_total: i64,
    pub latest_sequence: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn delta_response_serializes_empty_entries_as_array() {
        let response = DeltaResponse {
            entries: Vec::new(),
            last_sequence: 0,
            latest_sequence: 0,
            has_more: false,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["entries"], serde_json::json!([]));
    }

    #[test]
    fn feedback_result_omits_validation_count_when_absent() {
        let result = FeedbackResult {
            lore_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            feedback_type: FeedbackType::NotRelevant,
            confidence_before: 0.5,
            confidence_after: 0.5,
            validation_count: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("validation_count").is_none());
        assert_eq!(json["feedback_type"], "not_relevant");
    }

    #[test]
    fn create_store_request_uses_type_key() {
        let request: CreateStoreRequest = serde_json::from_value(serde_json::json!({
            "store_id": "org/project",
            "type": "recall",
            "description": "team lore"
        }))
        .unwrap();
        assert_eq!(request.store_type, "recall");
    }
}
