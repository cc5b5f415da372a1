//! Integration tests for the multi-tenant store manager.

mod common;

use common::test_manager;
use engram_core::{Error, StoreId};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[tokio::test]
async fn create_then_get_round_trips() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    let id = StoreId::parse("org/project").unwrap();

    manager.create(&id, "recall", Some("team lore")).await.unwrap();
    let engine = manager.get(&id).await.unwrap();
    assert_eq!(engine.store_id(), &id);

    let info = manager.store_info(&id).await.unwrap();
    assert_eq!(info.store_type, "recall");
    assert_eq!(info.description.as_deref(), Some("team lore"));
    assert_eq!(info.schema_version, 2);
    assert_eq!(info.lore_count, 0);
}

#[tokio::test]
async fn create_rejects_existing_store() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    let id = StoreId::parse("org/project").unwrap();

    manager.create(&id, "recall", None).await.unwrap();
    let err = manager.create(&id, "recall", None).await.unwrap_err();
    assert!(matches!(err, Error::StoreExists(_)));
}

#[tokio::test]
async fn create_rejects_unknown_store_type() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    let err = manager
        .create(&StoreId::parse("org").unwrap(), "warehouse", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn get_of_missing_store_is_not_found() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    let err = manager
        .get(&StoreId::parse("nowhere").unwrap())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn stores_reopen_lazily_from_disk() {
    let dir = TempDir::new().unwrap();
    let id = StoreId::parse("org/project").unwrap();

    {
        let manager = test_manager(dir.path());
        manager.create(&id, "tract", None).await.unwrap();
        manager.close_all().await;
    }

    // A fresh manager discovers the store and its recorded type.
    let manager = test_manager(dir.path());
    let info = manager.store_info(&id).await.unwrap();
    assert_eq!(info.store_type, "tract");
}

#[tokio::test]
async fn default_store_is_created_on_demand() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());

    let engine = manager.get_or_create_default().await.unwrap();
    assert!(engine.store_id().is_default());

    // A second call returns the same store.
    let again = manager.get_or_create_default().await.unwrap();
    assert_eq!(again.store_id(), engine.store_id());
}

#[tokio::test]
async fn list_is_sorted_by_id() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());

    for id in ["zeta", "alpha", "org/beta"] {
        manager
            .create(&StoreId::parse(id).unwrap(), "recall", None)
            .await
            .unwrap();
    }

    let stores = manager.list().await.unwrap();
    let ids: Vec<&str> = stores.iter().map(|s| s.store_id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "org/beta", "zeta"]);
}

#[tokio::test]
async fn delete_refuses_the_default_store() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    manager.get_or_create_default().await.unwrap();

    let err = manager.delete(&StoreId::default_store()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(manager.get(&StoreId::default_store()).await.is_ok());
}

#[tokio::test]
async fn delete_removes_store_and_directory() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(dir.path());
    let id = StoreId::parse("org/doomed").unwrap();

    manager.create(&id, "recall", None).await.unwrap();
    manager.delete(&id).await.unwrap();

    assert!(manager.get(&id).await.unwrap_err().is_not_found());
    assert!(!dir.path().join("org").join("doomed").exists());

    let err = manager.delete(&id).await.unwrap_err();
    assert!(err.is_not_found());
}
