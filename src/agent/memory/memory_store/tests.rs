use super::*;
use crate::config::MemoryConfig;

#[test]
fn new_creates_memory_dir_and_db() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = MemoryStore::new(tmp.path()).unwrap();
    assert!(tmp.path().join("memory").is_dir());
    assert!(tmp.path().join("memory/memory.sqlite3").exists());
    assert!(store.indexer.is_none());
    assert!(store.hygiene.is_none());
}

#[test]
fn with_indexer_interval_configures_indexer_only() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = MemoryStore::with_indexer_interval(tmp.path(), 60).unwrap();
    assert!(store.indexer.is_some());
    assert!(store.hygiene.is_none());
}

#[test]
fn with_config_configures_hygiene_from_memory_config() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut mem_cfg = MemoryConfig::default();
    mem_cfg.archive_after_days = 30;
    mem_cfg.purge_after_days = 90;

    let store = MemoryStore::with_config(tmp.path(), 60, &mem_cfg).unwrap();
    assert!(store.indexer.is_some());
    assert_eq!(store.hygiene, Some((30, 90)));
}

#[tokio::test]
async fn start_indexer_is_a_noop_without_configuration() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = MemoryStore::new(tmp.path()).unwrap();
    store.start_indexer().await.unwrap();
}

#[tokio::test]
async fn start_indexer_runs_with_indexer_configured() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = MemoryStore::with_indexer_interval(tmp.path(), 3600).unwrap();
    store.start_indexer().await.unwrap();
}

#[test]
fn db_returns_shared_handle() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = MemoryStore::new(tmp.path()).unwrap();
    let db_a = store.db();
    let db_b = store.db();
    assert!(Arc::ptr_eq(&db_a, &db_b));
}
