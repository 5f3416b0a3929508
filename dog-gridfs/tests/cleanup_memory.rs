use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dog_gridfs::{
    BlobAdapter, BlobResult, InMemoryObjectStore, OrphanCleanup, ReferenceSource, StoreConfig,
    UploadMetadata,
};

fn setup(keys: &[&str]) -> (InMemoryObjectStore, BlobAdapter) {
    let store = InMemoryObjectStore::new();
    for key in keys {
        store.insert_unchecked(key, b"blob", UploadMetadata::new("text/plain"));
    }
    let adapter = BlobAdapter::new(store.clone(), StoreConfig::default());
    (store, adapter)
}

fn referenced(names: &[&str]) -> HashSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Counts how often it is asked
struct CountingSource {
    live: HashSet<String>,
    calls: AtomicUsize,
    largest_batch: AtomicUsize,
}

#[async_trait]
impl ReferenceSource for CountingSource {
    async fn referenced(&self, names: &[String]) -> BlobResult<HashSet<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.largest_batch.fetch_max(names.len(), Ordering::SeqCst);
        self.live.referenced(names).await
    }
}

#[tokio::test]
async fn test_unreferenced_blobs_are_deleted() {
    let (store, adapter) = setup(&[
        "attachments/a.png",
        "attachments/b.png",
        "attachments/sub/c.txt",
        "other/x",
    ]);

    let report = OrphanCleanup::new(&adapter, "attachments")
        .run(&referenced(&["a.png", "sub/c.txt"]))
        .await
        .unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.orphaned, vec!["b.png".to_string()]);
    assert_eq!(report.deleted, 1);

    assert!(adapter.exists("attachments/a.png").await.unwrap());
    assert!(adapter.exists("attachments/sub/c.txt").await.unwrap());
    assert!(!adapter.exists("attachments/b.png").await.unwrap());
    assert!(adapter.exists("other/x").await.unwrap());
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn test_dry_run_deletes_nothing() {
    let (store, adapter) = setup(&["attachments/a", "attachments/b", "attachments/c"]);

    let report = OrphanCleanup::new(&adapter, "attachments")
        .dry_run(true)
        .run(&referenced(&["b"]))
        .await
        .unwrap();

    assert_eq!(report.orphaned, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(report.deleted, 0);
    assert_eq!(store.len(), 3);
    assert_eq!(store.stats().deletes, 0);
}

#[tokio::test]
async fn test_names_are_checked_in_batches() {
    let keys: Vec<String> = (0..7).map(|i| format!("attachments/{i}")).collect();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let (_store, adapter) = setup(&key_refs);

    let source = CountingSource {
        live: referenced(&["0", "1", "2", "3", "4", "5", "6"]),
        calls: AtomicUsize::new(0),
        largest_batch: AtomicUsize::new(0),
    };
    let report = OrphanCleanup::new(&adapter, "attachments")
        .with_batch_size(3)
        .run(&source)
        .await
        .unwrap();

    assert_eq!(report.scanned, 7);
    assert!(report.orphaned.is_empty());
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    assert_eq!(source.largest_batch.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_namespace_boundary_and_normalisation() {
    let (_store, adapter) = setup(&["attachments/a", "attachments-old/z", "attachmentsb"]);

    let cleanup = OrphanCleanup::new(&adapter, "/attachments/");
    assert_eq!(cleanup.namespace(), "attachments");
    assert_eq!(cleanup.stored_names().await.unwrap(), vec!["a".to_string()]);

    let report = cleanup.run(&HashSet::new()).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert!(adapter.exists("attachments-old/z").await.unwrap());
    assert!(adapter.exists("attachmentsb").await.unwrap());
}

#[tokio::test]
async fn test_duplicate_records_are_all_removed() {
    let (store, adapter) = setup(&["attachments/dup", "attachments/dup", "attachments/kept"]);

    let report = OrphanCleanup::new(&adapter, "attachments")
        .run(&referenced(&["kept"]))
        .await
        .unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.orphaned, vec!["dup".to_string()]);
    assert_eq!(report.deleted, 2);
    assert!(store.ids_named("attachments/dup").is_empty());
    assert_eq!(store.len(), 1);
}
