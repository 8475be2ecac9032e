//! Test: the step list survives restarts and bad storage

use crate::helpers::*;
use image_pipeline::core::config::{StorageConfig, StorageKind};
use image_pipeline::core::defaults::default_steps;
use image_pipeline::persistence::{open_storage, FileStorage};
use image_pipeline::{InMemoryStorage, MoveDirection, StepDefinition, StepStore, StorageBackend};
use std::sync::Arc;

const KEY: &str = "steps";

/// Edit a freshly seeded store, then reopen the backend and compare
async fn assert_round_trip(open: impl Fn() -> Arc<dyn StorageBackend>) {
    let defaults = templates(&[("blur", "src"), ("edges", "src")]);

    let mut store = StepStore::new(open(), KEY);
    store.load(&defaults).await;
    let added = store.add("invert", "cv::set(dst, 0);").await.unwrap();
    store.move_step(2, MoveDirection::Up).await.unwrap();
    let first = store.list()[0].id.clone();
    store.set_enabled(&first, false).await.unwrap();
    let expected: Vec<StepDefinition> = store.list().to_vec();
    drop(store);

    let mut reopened = StepStore::new(open(), KEY);
    reopened.load(&templates(&[("ignored", "src")])).await;

    assert_eq!(reopened.list(), expected.as_slice());
    assert_eq!(reopened.list()[1].id, added.id);
    assert!(!reopened.list()[0].enabled);
}

#[tokio::test]
async fn test_file_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    assert_round_trip(|| Arc::new(FileStorage::new(path.clone()))).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_storage_round_trip() {
    use image_pipeline::persistence::SqliteStorage;

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("steps.db");

    let defaults = templates(&[("blur", "src")]);
    let mut store = StepStore::new(Arc::new(SqliteStorage::open(&db).await.unwrap()), KEY);
    store.load(&defaults).await;
    store.add("invert", "cv::set(dst, 0);").await.unwrap();
    let expected = store.list().to_vec();
    drop(store);

    let mut reopened = StepStore::new(Arc::new(SqliteStorage::open(&db).await.unwrap()), KEY);
    reopened.load(&[]).await;
    assert_eq!(reopened.list(), expected.as_slice());
}

#[tokio::test]
async fn test_seeded_ids_are_stable() {
    let backend = Arc::new(InMemoryStorage::new());
    let defaults = default_steps();

    let mut first = StepStore::new(backend.clone(), KEY);
    first.load(&defaults).await;
    let mut second = StepStore::new(backend.clone(), KEY);
    second.load(&defaults).await;

    assert_eq!(first.len(), defaults.len());
    assert_eq!(first.list(), second.list());
}

#[tokio::test]
async fn test_corrupt_blob_falls_back_to_defaults() {
    let backend = Arc::new(InMemoryStorage::new());
    backend.set(KEY, "{ definitely not a step list").await.unwrap();

    let mut store = StepStore::new(backend.clone(), KEY);
    store.load(&templates(&[("only", "src")])).await;

    assert_eq!(store.len(), 1);
    assert_eq!(store.list()[0].name, "only");

    // The defaults replaced the bad blob
    let blob = backend.get(KEY).await.unwrap().unwrap();
    let stored: Vec<StepDefinition> = serde_json::from_str(&blob).unwrap();
    assert_eq!(stored, store.list());
}

#[tokio::test]
async fn test_reset_restores_defaults() {
    let backend = Arc::new(InMemoryStorage::new());
    let defaults = templates(&[("a", "src"), ("b", "src")]);
    let mut store = StepStore::new(backend.clone(), KEY);
    store.load(&defaults).await;
    let original_ids: Vec<String> = store.list().iter().map(|s| s.id.clone()).collect();
    store.add("extra", "src").await.unwrap();

    store.reset(&defaults).await.unwrap();

    let names: Vec<&str> = store.list().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    // Fresh identities
    assert!(store.list().iter().all(|s| !original_ids.contains(&s.id)));
}

#[tokio::test]
async fn test_open_storage_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        backend: StorageKind::File,
        path: Some(dir.path().join("steps")),
        key: "pipeline".to_string(),
    };

    let backend = open_storage(&config).await.unwrap();
    backend.set("pipeline", "[]").await.unwrap();

    assert!(dir.path().join("steps").join("pipeline.json").exists());
    assert_eq!(backend.get("pipeline").await.unwrap().as_deref(), Some("[]"));
}
