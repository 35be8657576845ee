//! Trait contract tests for BlobStore, TagRegistry, and RunLedger.
//!
//! Each contract is written once against the trait and run against both the
//! in-memory fakes and the SurrealDB (`mem://`) backends.

use std::time::Duration;

use chrono::Utc;
use conveyor_state::fakes::{
    MemoryBlobStore, MemoryRunLedger, MemoryTagRegistry, UnreachableTagRegistry,
};
use conveyor_state::storage_traits::*;
use conveyor_state::{FsBlobStore, StorageError, SurrealHandle};

fn sample_metadata() -> RunMetadata {
    RunMetadata {
        repository: "sample-cluster-app".to_string(),
        commit_sha: Some("abc123".to_string()),
        tags: serde_json::json!({"trigger": "push"}),
    }
}

fn event(seq: u64, kind: &str) -> RunEvent {
    RunEvent {
        seq,
        kind: kind.to_string(),
        payload: serde_json::json!({"stage": "test"}),
        timestamp: Utc::now(),
    }
}

fn summary(success: bool, failed_stage: Option<&str>) -> RunSummary {
    RunSummary {
        total_events: 2,
        duration_ms: 150,
        success,
        failed_stage: failed_stage.map(str::to_string),
    }
}

// ===========================================================================
// BlobStore contract
// ===========================================================================

async fn blob_contract(store: &dyn BlobStore) {
    let data = b"hello artifact";
    let digest = store.put(data).await.unwrap();
    assert_eq!(digest, ContentDigest::from_bytes(data));
    assert_eq!(store.get(&digest).await.unwrap(), data);
    assert!(store.contains(&digest).await.unwrap());

    let again = store.put(data).await.unwrap();
    assert_eq!(digest, again);

    let missing = ContentDigest::from_bytes(b"never stored");
    assert!(!store.contains(&missing).await.unwrap());
    let err = store.get(&missing).await.unwrap_err();
    assert!(matches!(err, StorageError::BlobNotFound { .. }));
}

#[tokio::test]
async fn memory_blob_store_satisfies_contract() {
    let store = MemoryBlobStore::new();
    blob_contract(&store).await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn fs_blob_store_satisfies_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::new(dir.path()).unwrap();
    blob_contract(&store).await;
}

// ===========================================================================
// TagRegistry contract
// ===========================================================================

async fn tag_contract(registry: &dyn TagRegistry) {
    let err = registry.get("never-written").await.unwrap_err();
    assert!(matches!(err, StorageError::TagNotFound { ref key } if key == "never-written"));

    let first = registry
        .put("myrepo-image-latest-tag", "20240101120000")
        .await
        .unwrap();
    assert_eq!(first.value, "20240101120000");

    registry
        .put("myrepo-image-latest-tag", "20240101120500")
        .await
        .unwrap();
    let current = registry.get("myrepo-image-latest-tag").await.unwrap();
    assert_eq!(current.key, "myrepo-image-latest-tag");
    assert_eq!(current.value, "20240101120500");

    // Keys are independent.
    registry.put("other-image-latest-tag", "x").await.unwrap();
    assert_eq!(
        registry.get("myrepo-image-latest-tag").await.unwrap().value,
        "20240101120500"
    );
}

#[tokio::test]
async fn memory_tag_registry_satisfies_contract() {
    let registry = MemoryTagRegistry::new();
    tag_contract(&registry).await;
    assert_eq!(registry.write_count(), 3);
}

#[tokio::test]
async fn surreal_tag_registry_satisfies_contract() {
    let handle = SurrealHandle::in_memory().await.unwrap();
    tag_contract(&handle.tag_registry()).await;
}

#[tokio::test]
async fn surreal_tag_value_is_stored_raw() {
    let handle = SurrealHandle::in_memory().await.unwrap();
    let registry = handle.tag_registry();
    registry.put("k", "\"quoted\"").await.unwrap();
    assert_eq!(registry.get("k").await.unwrap().value, "\"quoted\"");
}

#[tokio::test]
async fn unreachable_registry_reports_backend_error() {
    let registry = UnreachableTagRegistry;
    assert!(matches!(
        registry.get("k").await.unwrap_err(),
        StorageError::Backend(_)
    ));
    assert!(matches!(
        registry.put("k", "v").await.unwrap_err(),
        StorageError::Backend(_)
    ));
}

// ===========================================================================
// RunLedger contract
// ===========================================================================

async fn ledger_lifecycle_contract(ledger: &dyn RunLedger) {
    let spec = ContentDigest::from_bytes(b"pipeline spec");
    let run_id = ledger.create_run(&spec, sample_metadata()).await.unwrap();

    let record = ledger.get_run(&run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Running);
    assert!(record.summary.is_none());
    assert_eq!(record.metadata.repository, "sample-cluster-app");

    ledger
        .append_event(&run_id, event(2, "stage_succeeded"))
        .await
        .unwrap();
    ledger
        .append_event(&run_id, event(1, "stage_started"))
        .await
        .unwrap();

    let events = ledger.get_events(&run_id).await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2]);

    ledger
        .fail_run(&run_id, summary(false, Some("test")))
        .await
        .unwrap();
    let record = ledger.get_run(&run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.completed_at.is_some());
    let s = record.summary.unwrap();
    assert!(!s.success);
    assert_eq!(s.failed_stage.as_deref(), Some("test"));

    // Terminal runs reject further writes.
    let err = ledger
        .append_event(&run_id, event(3, "stage_started"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));
    let err = ledger
        .complete_run(&run_id, summary(true, None))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

async fn ledger_listing_contract(ledger: &dyn RunLedger) {
    let spec_a = ContentDigest::from_bytes(b"spec a");
    let spec_b = ContentDigest::from_bytes(b"spec b");

    let first = ledger.create_run(&spec_a, sample_metadata()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = ledger.create_run(&spec_b, sample_metadata()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let third = ledger.create_run(&spec_a, sample_metadata()).await.unwrap();
    ledger
        .complete_run(&third, summary(true, None))
        .await
        .unwrap();

    let all = ledger.list_runs(None).await.unwrap();
    let ids: Vec<&RunId> = all.iter().map(|r| &r.run_id).collect();
    assert_eq!(ids, vec![&third, &second, &first]);

    let only_a = ledger.list_runs(Some(&spec_a)).await.unwrap();
    assert_eq!(only_a.len(), 2);
    assert!(only_a.iter().all(|r| r.spec_digest == spec_a));
    assert_eq!(only_a[0].status, RunStatus::Completed);
}

async fn ledger_missing_run_contract(ledger: &dyn RunLedger) {
    let ghost = RunId::new();
    assert!(matches!(
        ledger.get_run(&ghost).await.unwrap_err(),
        StorageError::RunNotFound { .. }
    ));
    assert!(matches!(
        ledger.get_events(&ghost).await.unwrap_err(),
        StorageError::RunNotFound { .. }
    ));
    assert!(matches!(
        ledger.append_event(&ghost, event(1, "x")).await.unwrap_err(),
        StorageError::RunNotFound { .. }
    ));
}

#[tokio::test]
async fn memory_ledger_lifecycle() {
    ledger_lifecycle_contract(&MemoryRunLedger::new()).await;
}

#[tokio::test]
async fn memory_ledger_listing() {
    ledger_listing_contract(&MemoryRunLedger::new()).await;
}

#[tokio::test]
async fn memory_ledger_missing_run() {
    ledger_missing_run_contract(&MemoryRunLedger::new()).await;
}

#[tokio::test]
async fn surreal_ledger_lifecycle() {
    let handle = SurrealHandle::in_memory().await.unwrap();
    ledger_lifecycle_contract(&handle.run_ledger()).await;
}

#[tokio::test]
async fn surreal_ledger_listing() {
    let handle = SurrealHandle::in_memory().await.unwrap();
    ledger_listing_contract(&handle.run_ledger()).await;
}

#[tokio::test]
async fn surreal_ledger_missing_run() {
    let handle = SurrealHandle::in_memory().await.unwrap();
    ledger_missing_run_contract(&handle.run_ledger()).await;
}
