//! Row mapping and vector helpers shared across the storage crate.

use engram_core::error::{Error, Result};
use engram_core::{ChangeLogEntry, ChangeOperation, EmbeddingStatus, LoreCategory, LoreEntry};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

/// Encode an embedding vector as little-endian f32 bytes for BLOB storage.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB column back into an embedding vector.
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::storage(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs, which
/// keeps degenerate rows out of similarity results instead of erroring
/// the whole query.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Decode a `lore` table row into a [`LoreEntry`].
pub fn lore_from_row(row: &SqliteRow) -> Result<LoreEntry> {
    let category_raw: String = row
        .try_get("category")
        .map_err(|e| Error::storage(format!("Failed to extract category: {e}")))?;
    let category = LoreCategory::from_str(&category_raw)
        .map_err(|_| Error::storage(format!("Unknown category in row: {category_raw}")))?;

    let status_raw: String = row
        .try_get("embedding_status")
        .map_err(|e| Error::storage(format!("Failed to extract embedding_status: {e}")))?;
    let embedding_status = EmbeddingStatus::from_str(&status_raw)
        .map_err(|_| Error::storage(format!("Unknown embedding status in row: {status_raw}")))?;

    let embedding_blob: Option<Vec<u8>> = row
        .try_get("embedding")
        .map_err(|e| Error::storage(format!("Failed to extract embedding: {e}")))?;
    let embedding = embedding_blob
        .as_deref()
        .map(decode_embedding)
        .transpose()?;

    let sources_raw: String = row
        .try_get("sources")
        .map_err(|e| Error::storage(format!("Failed to extract sources: {e}")))?;
    let sources: Vec<String> = serde_json::from_str(&sources_raw)
        .map_err(|e| Error::storage(format!("Corrupt sources column: {e}")))?;

    Ok(LoreEntry {
        id: row
            .try_get("id")
            .map_err(|e| Error::storage(format!("Failed to extract id: {e}")))?,
        content: row
            .try_get("content")
            .map_err(|e| Error::storage(format!("Failed to extract content: {e}")))?,
        context: row
            .try_get("context")
            .map_err(|e| Error::storage(format!("Failed to extract context: {e}")))?,
        category,
        confidence: row
            .try_get("confidence")
            .map_err(|e| Error::storage(format!("Failed to extract confidence: {e}")))?,
        embedding,
        embedding_status,
        source_id: row
            .try_get("source_id")
            .map_err(|e| Error::storage(format!("Failed to extract source_id: {e}")))?,
        sources,
        validation_count: row
            .try_get("validation_count")
            .map_err(|e| Error::storage(format!("Failed to extract validation_count: {e}")))?,
        last_validated_at: row
            .try_get("last_validated_at")
            .map_err(|e| Error::storage(format!("Failed to extract last_validated_at: {e}")))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| Error::storage(format!("Failed to extract created_at: {e}")))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| Error::storage(format!("Failed to extract updated_at: {e}")))?,
        deleted_at: row
            .try_get("deleted_at")
            .map_err(|e| Error::storage(format!("Failed to extract deleted_at: {e}")))?,
    })
}

/// Decode a `change_log` row into a [`ChangeLogEntry`].
pub fn change_log_from_row(row: &SqliteRow) -> Result<ChangeLogEntry> {
    let operation_raw: String = row
        .try_get("operation")
        .map_err(|e| Error::storage(format!("Failed to extract operation: {e}")))?;
    let operation = ChangeOperation::from_str(&operation_raw)
        .map_err(|_| Error::storage(format!("Unknown operation in row: {operation_raw}")))?;

    let payload_raw: Option<String> = row
        .try_get("payload")
        .map_err(|e| Error::storage(format!("Failed to extract payload: {e}")))?;
    let payload = payload_raw
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::storage(format!("Corrupt payload column: {e}")))?;

    Ok(ChangeLogEntry {
        sequence: row
            .try_get("sequence")
            .map_err(|e| Error::storage(format!("Failed to extract sequence: {e}")))?,
        table_name: row
            .try_get("table_name")
            .map_err(|e| Error::storage(format!("Failed to extract table_name: {e}")))?,
        entity_id: row
            .try_get("entity_id")
            .map_err(|e| Error::storage(format!("Failed to extract entity_id: {e}")))?,
        operation,
        payload,
        source_id: row
            .try_get("source_id")
            .map_err(|e| Error::storage(format!("Failed to extract source_id: {e}")))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| Error::storage(format!("Failed to extract created_at: {e}")))?,
        received_at: row
            .try_get("received_at")
            .map_err(|e| Error::storage(format!("Failed to extract received_at: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_round_trips() {
        let vector = vec![0.25f32, -1.5, 3.125];
        let decoded = decode_embedding(&encode_embedding(&vector)).unwrap();
        assert_eq!(decoded, vector);
    }

    #[test]
    fn decode_rejects_ragged_blob() {
        assert!(decode_embedding(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3f32, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
