//! Lore entries and the rules for mutating them.
//!
//! A lore entry is a small unit of experiential knowledge: content, a
//! category from a closed set, a confidence score, and (eventually) an
//! embedding vector. Entries are merged rather than duplicated when their
//! embeddings land close together, so the mutation rules here are careful
//! about caps and bounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::FieldError;

/// Confidence boost applied when a near-duplicate is merged into an entry.
pub const MERGE_CONFIDENCE_BOOST: f64 = 0.10;

/// Confidence boost applied by `helpful` feedback.
pub const HELPFUL_CONFIDENCE_BOOST: f64 = 0.08;

/// Confidence penalty applied by `incorrect` feedback.
pub const INCORRECT_CONFIDENCE_PENALTY: f64 = 0.15;

/// Maximum length of an entry's context, in Unicode code points.
pub const MAX_CONTEXT_CHARS: usize = 1000;

/// Maximum length of an entry's content, in Unicode code points.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Separator inserted between the target's and the source's context on merge.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Marker appended when context is truncated to fit [`MAX_CONTEXT_CHARS`].
pub const TRUNCATION_MARKER: &str = "...";

/// Upper bound on an entry's accumulated sources set.
pub const MAX_SOURCES: usize = 1000;

/// Category of a lore entry (closed set)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LoreCategory {
    PatternOutcome,
    TaskContext,
    UserPreference,
    DomainFact,
    ToolUsage,
    FailureMode,
}

impl LoreCategory {
    /// All categories, in a stable order (used by stats aggregation).
    pub const ALL: [LoreCategory; 6] = [
        LoreCategory::PatternOutcome,
        LoreCategory::TaskContext,
        LoreCategory::UserPreference,
        LoreCategory::DomainFact,
        LoreCategory::ToolUsage,
        LoreCategory::FailureMode,
    ];
}

/// Embedding lifecycle state of a lore entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Complete,
    Failed,
}

/// Kind of client feedback on an entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeedbackType {
    Helpful,
    NotRelevant,
    Incorrect,
}

/// A stored lore entry.
///
/// This struct is also the canonical change-log payload shape for the
/// `lore` table: snake_case field names, RFC 3339 timestamps, `sources`
/// always present (serialized as `[]` when empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreEntry {
    /// Lexicographically-sortable 26-character id (ULID)
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub category: LoreCategory,
    /// Confidence in [0.0, 1.0]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub embedding_status: EmbeddingStatus,
    /// Writer that first produced this entry
    pub source_id: String,
    /// Unordered set of all writers merged into this entry
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub validation_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LoreEntry {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A new entry as submitted by an ingest request, before ids and
/// timestamps are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoreDraft {
    pub content: String,
    #[serde(default)]
    pub context: Option<String>,
    pub category: LoreCategory,
    pub confidence: f64,
}

impl LoreDraft {
    /// Validate field constraints, returning one error per violated field.
    ///
    /// An empty result means the draft is acceptable.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.content.trim().is_empty() {
            errors.push(FieldError::new("content", "content must be non-empty"));
        } else if self.content.chars().count() > MAX_CONTENT_CHARS {
            errors.push(FieldError::new(
                "content",
                format!("content exceeds {MAX_CONTENT_CHARS} characters"),
            ));
        }

        if let Some(context) = &self.context {
            if context.chars().count() > MAX_CONTEXT_CHARS {
                errors.push(FieldError::new(
                    "context",
                    format!("context exceeds {MAX_CONTEXT_CHARS} characters"),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.confidence) {
            errors.push(FieldError::new(
                "confidence",
                "confidence must be within [0.0, 1.0]",
            ));
        }

        errors
    }
}

/// Clamp a boosted confidence to the [0.0, 1.0] band.
pub fn boost_confidence(current: f64, boost: f64) -> f64 {
    (current + boost).clamp(0.0, 1.0)
}

/// Combine a merge target's context with the merged source's context.
///
/// The source context is appended after [`CONTEXT_SEPARATOR`]. When the
/// combination exceeds [`MAX_CONTEXT_CHARS`] code points it is truncated
/// from the tail (the existing context wins) and [`TRUNCATION_MARKER`] is
/// appended; the marker counts toward the bound.
pub fn merge_context(existing: Option<&str>, incoming: Option<&str>) -> Option<String> {
    let combined = match (existing, incoming) {
        (None, None) => return None,
        (Some(e), None) => e.to_string(),
        (None, Some(i)) => i.to_string(),
        (Some(e), Some(i)) if i.trim().is_empty() => e.to_string(),
        (Some(e), Some(i)) => format!("{e}{CONTEXT_SEPARATOR}{i}"),
    };

    if combined.chars().count() <= MAX_CONTEXT_CHARS {
        return Some(combined);
    }

    let keep = MAX_CONTEXT_CHARS - TRUNCATION_MARKER.chars().count();
    let mut truncated: String = combined.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    Some(truncated)
}

/// Union `incoming` into `sources`, preserving first-seen order and the
/// [`MAX_SOURCES`] cap. Ids beyond the cap are dropped.
pub fn union_sources(sources: &mut Vec<String>, incoming: &[String]) {
    for id in incoming {
        if sources.len() >= MAX_SOURCES {
            return;
        }
        if !sources.iter().any(|s| s == id) {
            sources.push(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn category_round_trips_screaming_snake_case() {
        let json = serde_json::to_string(&LoreCategory::PatternOutcome).unwrap();
        assert_eq!(json, "\"PATTERN_OUTCOME\"");
        let parsed: LoreCategory = serde_json::from_str("\"FAILURE_MODE\"").unwrap();
        assert_eq!(parsed, LoreCategory::FailureMode);
    }

    #[test]
    fn draft_validation_reports_each_bad_field() {
        let draft = LoreDraft {
            content: "   ".to_string(),
            context: None,
            category: LoreCategory::DomainFact,
            confidence: 1.5,
        };
        let errors = draft.validate();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "content");
        assert_eq!(errors[1].field, "confidence");
    }

    #[test]
    fn boost_caps_at_one() {
        assert_eq!(boost_confidence(0.95, MERGE_CONFIDENCE_BOOST), 1.0);
        assert_eq!(boost_confidence(0.5, MERGE_CONFIDENCE_BOOST), 0.6);
    }

    #[test]
    fn penalty_floors_at_zero() {
        assert_eq!(boost_confidence(0.1, -INCORRECT_CONFIDENCE_PENALTY), 0.0);
    }

    #[test]
    fn merge_context_appends_with_separator() {
        let merged = merge_context(Some("alpha"), Some("beta")).unwrap();
        assert_eq!(merged, format!("alpha{CONTEXT_SEPARATOR}beta"));
    }

    #[test]
    fn merge_context_truncates_preserving_existing() {
        let existing = "e".repeat(990);
        let incoming = "i".repeat(100);
        let merged = merge_context(Some(&existing), Some(&incoming)).unwrap();
        assert_eq!(merged.chars().count(), MAX_CONTEXT_CHARS);
        assert!(merged.starts_with(&existing));
        assert!(merged.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn merge_context_never_exceeds_cap_when_iterated() {
        let mut context = Some("seed".to_string());
        for _ in 0..50 {
            context = merge_context(context.as_deref(), Some("more context to append"));
            assert!(context.as_ref().unwrap().chars().count() <= MAX_CONTEXT_CHARS);
        }
    }

    #[test]
    fn union_sources_dedupes_and_caps() {
        let mut sources = vec!["a".to_string(), "b".to_string()];
        union_sources(&mut sources, &["b".to_string(), "c".to_string()]);
        assert_eq!(sources, vec!["a", "b", "c"]);

        let mut full: Vec<String> = (0..MAX_SOURCES).map(|i| format!("s{i}")).collect();
        union_sources(&mut full, &["overflow".to_string()]);
        assert_eq!(full.len(), MAX_SOURCES);
        assert!(!full.contains(&"overflow".to_string()));
    }
}
