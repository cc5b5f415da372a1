//! Integration tests for the sync protocol: push idempotency, schema
//! checks, atomicity, delta pagination, and store isolation.

mod common;

use chrono::Utc;
use common::{
    lore_upsert_entry, open_recall_store, push_request, test_manager, REPLAY_POISON_ID,
};
use engram_core::{ChangeOperation, Error, PushEntry, StoreId};
use engram_storage::{execute_delta, execute_push};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const MAX_PUSH_ENTRIES: usize = 1000;

#[tokio::test]
async fn change_log_sequences_are_dense_and_monotonic() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    for i in 0..3 {
        let request = push_request(&format!("push-{i}"), vec![lore_upsert_entry(i)]);
        execute_push(&engine, &request, MAX_PUSH_ENTRIES)
            .await
            .unwrap();
    }

    let log = engine.get_change_log_after(0, 100).await.unwrap();
    let sequences: Vec<i64> = log.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn push_response_reports_the_assigned_sequences() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let request = push_request("p1", vec![lore_upsert_entry(1), lore_upsert_entry(2)]);
    let outcome = execute_push(&engine, &request, MAX_PUSH_ENTRIES)
        .await
        .unwrap();
    assert_eq!(outcome.response.accepted, 2);
    assert_eq!(outcome.response.remote_sequence, 2);
    assert!(!outcome.idempotent_replay);
}

#[tokio::test]
async fn idempotent_replay_returns_cached_bytes_and_appends_nothing() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let first = execute_push(
        &engine,
        &push_request("P1", vec![lore_upsert_entry(1)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();
    let seq = engine.latest_sequence().await.unwrap();

    // Re-send with a different body but the same push_id.
    let replay = execute_push(
        &engine,
        &push_request("P1", vec![lore_upsert_entry(2), lore_upsert_entry(3)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();

    assert!(replay.idempotent_replay);
    assert_eq!(replay.body, first.body);
    assert_eq!(replay.response, first.response);
    assert_eq!(engine.latest_sequence().await.unwrap(), seq);
}

#[tokio::test]
async fn schema_ahead_is_rejected_with_both_versions() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let mut request = push_request("p1", vec![lore_upsert_entry(1)]);
    request.schema_version = 3;
    let err = execute_push(&engine, &request, MAX_PUSH_ENTRIES)
        .await
        .unwrap_err();
    match err {
        Error::SchemaMismatch {
            client_version,
            server_version,
        } => {
            assert_eq!(client_version, 3);
            assert_eq!(server_version, 2);
        }
        other => panic!("expected SchemaMismatch, got {other:?}"),
    }
    assert_eq!(engine.latest_sequence().await.unwrap(), 0);
}

#[tokio::test]
async fn client_behind_is_accepted() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let mut request = push_request("p1", vec![lore_upsert_entry(1)]);
    request.schema_version = 1;
    assert!(execute_push(&engine, &request, MAX_PUSH_ENTRIES).await.is_ok());
}

#[tokio::test]
async fn validation_failure_rejects_the_whole_push() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let mut bad = lore_upsert_entry(2);
    bad.table_name = "goals".to_string();
    let request = push_request("p1", vec![lore_upsert_entry(1), bad]);

    let err = execute_push(&engine, &request, MAX_PUSH_ENTRIES)
        .await
        .unwrap_err();
    match err {
        Error::PushValidation(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].code, "unknown_table");
        }
        other => panic!("expected PushValidation, got {other:?}"),
    }
    // Nothing committed, nothing cached: a corrected retry executes.
    assert_eq!(engine.latest_sequence().await.unwrap(), 0);
    let retry = execute_push(
        &engine,
        &push_request("p1", vec![lore_upsert_entry(1)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();
    assert!(!retry.idempotent_replay);
}

#[tokio::test]
async fn shape_violations_are_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let mut no_push_id = push_request("", vec![]);
    no_push_id.push_id = "".to_string();
    assert!(matches!(
        execute_push(&engine, &no_push_id, MAX_PUSH_ENTRIES).await,
        Err(Error::InvalidInput(_))
    ));

    let mut bad_schema = push_request("p1", vec![]);
    bad_schema.schema_version = 0;
    assert!(matches!(
        execute_push(&engine, &bad_schema, MAX_PUSH_ENTRIES).await,
        Err(Error::InvalidInput(_))
    ));

    let oversized = push_request("p2", (0..3).map(lore_upsert_entry).collect());
    assert!(matches!(
        execute_push(&engine, &oversized, 2).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn failed_replay_rolls_back_domain_tables_and_log_together() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    let engine = manager
        .create(&StoreId::parse("tract-store").unwrap(), "tract", None)
        .await
        .unwrap();

    let good = PushEntry {
        sequence: 1,
        table_name: "goal".to_string(),
        entity_id: "g1".to_string(),
        operation: ChangeOperation::Upsert,
        payload: Some(serde_json::json!({ "name": "ship it" })),
        created_at: Utc::now(),
    };
    let poison = PushEntry {
        sequence: 2,
        table_name: "ic".to_string(),
        entity_id: REPLAY_POISON_ID.to_string(),
        operation: ChangeOperation::Upsert,
        payload: None,
        created_at: Utc::now(),
    };

    let err = execute_push(&engine, &push_request("p1", vec![good, poison]), MAX_PUSH_ENTRIES)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    // The goal row replayed before the poison entry must be gone too.
    assert_eq!(engine.latest_sequence().await.unwrap(), 0);
    assert!(engine.check_push_idempotency("p1").await.unwrap().is_none());
    let delta = execute_delta(&engine, 0, 100).await.unwrap();
    assert!(delta.entries.is_empty());
}

#[tokio::test]
async fn entries_are_replayed_and_logged_in_fk_order() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    let engine = manager
        .create(&StoreId::parse("tract-store").unwrap(), "tract", None)
        .await
        .unwrap();

    let entry = |seq: i64, table: &str, id: &str| PushEntry {
        sequence: seq,
        table_name: table.to_string(),
        entity_id: id.to_string(),
        operation: ChangeOperation::Upsert,
        payload: Some(serde_json::json!({ "name": id })),
        created_at: Utc::now(),
    };

    // Client sends children first; the plugin declares parents first.
    let request = push_request(
        "p1",
        vec![
            entry(1, "ic", "i1"),
            entry(2, "fwu", "f1"),
            entry(3, "csf", "c1"),
            entry(4, "goal", "g1"),
        ],
    );
    let outcome = execute_push(&engine, &request, MAX_PUSH_ENTRIES)
        .await
        .unwrap();
    assert_eq!(outcome.response.accepted, 4);

    let delta = execute_delta(&engine, 0, 100).await.unwrap();
    let tables: Vec<&str> = delta.entries.iter().map(|e| e.table_name.as_str()).collect();
    assert_eq!(tables, vec!["goal", "csf", "fwu", "ic"]);
}

#[tokio::test]
async fn delta_pagination_walks_every_entry_exactly_once() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let entries: Vec<PushEntry> = (0..7).map(lore_upsert_entry).collect();
    execute_push(&engine, &push_request("p1", entries), MAX_PUSH_ENTRIES)
        .await
        .unwrap();

    for limit in [1i64, 3, 7, 100] {
        let mut after = 0;
        let mut seen = Vec::new();
        loop {
            let page = execute_delta(&engine, after, limit).await.unwrap();
            for entry in &page.entries {
                seen.push(entry.sequence);
            }
            assert_eq!(page.latest_sequence, 7);
            if page.entries.is_empty() {
                assert_eq!(page.last_sequence, after);
            }
            if !page.has_more {
                break;
            }
            after = page.last_sequence;
        }
        assert_eq!(seen, (1..=7).collect::<Vec<i64>>(), "limit {limit}");
    }
}

#[tokio::test]
async fn latest_upsert_for_an_entity_wins() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let first = lore_upsert_entry(1);
    let entity_id = first.entity_id.clone();
    let mut second = first.clone();
    second.sequence = 2;
    second.payload = Some(common::lore_payload(&entity_id, "revised content"));

    execute_push(&engine, &push_request("p1", vec![first, second]), MAX_PUSH_ENTRIES)
        .await
        .unwrap();

    // The domain row reflects the later record; the log keeps both.
    let entry = engine.get(&entity_id).await.unwrap();
    assert_eq!(entry.content, "revised content");
    let delta = execute_delta(&engine, 0, 100).await.unwrap();
    assert_eq!(delta.entries.len(), 2);
    assert_eq!(delta.entries[1].sequence, 2);
}

#[tokio::test]
async fn delta_payloads_follow_the_operation() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let upsert = lore_upsert_entry(1);
    let delete = PushEntry {
        sequence: 2,
        table_name: "lore".to_string(),
        entity_id: upsert.entity_id.clone(),
        operation: ChangeOperation::Delete,
        payload: None,
        created_at: Utc::now(),
    };
    execute_push(&engine, &push_request("p1", vec![upsert, delete]), MAX_PUSH_ENTRIES)
        .await
        .unwrap();

    let delta = execute_delta(&engine, 0, 100).await.unwrap();
    assert_eq!(delta.entries.len(), 2);
    assert!(delta.entries[0].payload.is_some());
    assert!(delta.entries[1].payload.is_none());
    assert_eq!(delta.entries[1].operation, ChangeOperation::Delete);
    // Upserts carry the writer stamped at receipt.
    assert_eq!(delta.entries[0].source_id, "client-a");
}

#[tokio::test]
async fn stores_are_isolated() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    let store_a = manager
        .create(&StoreId::parse("org/a").unwrap(), "recall", None)
        .await
        .unwrap();
    let store_b = manager
        .create(&StoreId::parse("org/b").unwrap(), "recall", None)
        .await
        .unwrap();

    execute_push(
        &store_a,
        &push_request("p1", vec![lore_upsert_entry(1)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();

    let delta_b = execute_delta(&store_b, 0, 100).await.unwrap();
    assert!(delta_b.entries.is_empty());
    assert_eq!(delta_b.latest_sequence, 0);

    // Idempotency keys are per store as well.
    let outcome_b = execute_push(
        &store_b,
        &push_request("p1", vec![lore_upsert_entry(1)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();
    assert!(!outcome_b.idempotent_replay);
}

#[tokio::test]
async fn compaction_drops_snapshotted_entries_and_guards_delta() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    let entries: Vec<PushEntry> = (0..5).map(lore_upsert_entry).collect();
    execute_push(&engine, &push_request("p1", entries), MAX_PUSH_ENTRIES)
        .await
        .unwrap();

    // Nothing to compact before a snapshot exists.
    let outcome = engine.compact_change_log().await.unwrap();
    assert_eq!(outcome.removed, 0);

    engine.generate_snapshot().await.unwrap();
    execute_push(
        &engine,
        &push_request("p2", vec![lore_upsert_entry(6)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();

    let outcome = engine.compact_change_log().await.unwrap();
    assert_eq!(outcome.removed, 5);
    assert_eq!(outcome.horizon, 5);
    assert_eq!(engine.compaction_horizon().await.unwrap(), 5);

    // Sequences never regress or get reused.
    assert_eq!(engine.latest_sequence().await.unwrap(), 6);

    // A client behind the horizon must re-bootstrap.
    let err = execute_delta(&engine, 0, 100).await.unwrap_err();
    match err {
        Error::CompactedLog { requested, horizon } => {
            assert_eq!(requested, 0);
            assert_eq!(horizon, 5);
        }
        other => panic!("expected CompactedLog, got {other:?}"),
    }

    // A client at or past the horizon pulls the intact tail.
    let delta = execute_delta(&engine, 5, 100).await.unwrap();
    let sequences: Vec<i64> = delta.entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![6]);
    assert_eq!(delta.latest_sequence, 6);

    // New pushes continue the dense tail.
    execute_push(
        &engine,
        &push_request("p3", vec![lore_upsert_entry(7)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();
    assert_eq!(engine.latest_sequence().await.unwrap(), 7);
}

#[tokio::test]
async fn expired_idempotency_records_are_forgotten() {
    let dir = TempDir::new().unwrap();
    let manager = engram_storage::StoreManager::new(
        engram_core::config::StorageConfig {
            data_dir: dir.path().to_path_buf(),
            idempotency_ttl_hours: 0,
            ..Default::default()
        },
        common::test_registry(),
    );
    let engine = manager
        .create(&StoreId::parse("default").unwrap(), "recall", None)
        .await
        .unwrap();

    execute_push(
        &engine,
        &push_request("p1", vec![lore_upsert_entry(1)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();

    // TTL zero: the cached response expires immediately, so the re-send
    // executes as a fresh push.
    let second = execute_push(
        &engine,
        &push_request("p1", vec![lore_upsert_entry(2)]),
        MAX_PUSH_ENTRIES,
    )
    .await
    .unwrap();
    assert!(!second.idempotent_replay);
    assert_eq!(engine.latest_sequence().await.unwrap(), 2);
}

#[tokio::test]
async fn empty_push_is_accepted_and_cached() {
    let dir = TempDir::new().unwrap();
    let engine = open_recall_store(dir.path(), "default").await;

    execute_push(&engine, &push_request("seed", vec![lore_upsert_entry(1)]), MAX_PUSH_ENTRIES)
        .await
        .unwrap();

    let outcome = execute_push(&engine, &push_request("empty", vec![]), MAX_PUSH_ENTRIES)
        .await
        .unwrap();
    assert_eq!(outcome.response.accepted, 0);
    assert_eq!(outcome.response.remote_sequence, 1);

    let replay = execute_push(&engine, &push_request("empty", vec![]), MAX_PUSH_ENTRIES)
        .await
        .unwrap();
    assert!(replay.idempotent_replay);
}
