use dog_gridfs::{
    BlobAdapter, BlobError, InMemoryObjectStore, ObjectStore, StoreConfig, UploadMetadata,
};
use futures_util::StreamExt;

const PNG_HEADER: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

fn setup() -> (InMemoryObjectStore, BlobAdapter) {
    let config = StoreConfig::default().with_chunk_size(16);
    let store = InMemoryObjectStore::with_config(&config);
    let adapter = BlobAdapter::new(store.clone(), config);
    (store, adapter)
}

#[tokio::test]
async fn test_write_read_round_trip() {
    let (store, adapter) = setup();
    let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

    assert_eq!(adapter.write("blobs/data.bin", &payload).await.unwrap(), 1000);
    assert_eq!(&adapter.read("blobs/data.bin").await.unwrap()[..], &payload[..]);

    let record = adapter.metadata("blobs/data.bin").await.unwrap().unwrap();
    assert_eq!(record.length, 1000);
    assert_eq!(store.chunk_count(&record.id), 63);
}

#[tokio::test]
async fn test_leading_slash_is_ignored() {
    let (store, adapter) = setup();

    adapter.write("/a/b", b"content").await.unwrap();
    assert_eq!(store.ids_named("a/b").len(), 1);
    assert_eq!(&adapter.read("a/b").await.unwrap()[..], b"content");
    assert_eq!(&adapter.read("//a/b").await.unwrap()[..], b"content");
    assert!(adapter.exists("/a/b").await.unwrap());
}

#[tokio::test]
async fn test_write_replaces() {
    let (store, adapter) = setup();

    adapter.write("k", b"first").await.unwrap();
    let first = store.ids_named("k");
    adapter.write("k", b"second").await.unwrap();
    let second = store.ids_named("k");

    assert_eq!(second.len(), 1);
    assert_ne!(first, second);
    assert_eq!(&adapter.read("k").await.unwrap()[..], b"second");
}

#[tokio::test]
async fn test_write_removes_stray_duplicates() {
    let (store, adapter) = setup();
    store.insert_unchecked("k", b"one", UploadMetadata::new("text/plain"));
    store.insert_unchecked("k", b"two", UploadMetadata::new("text/plain"));

    adapter.write("k", b"three").await.unwrap();
    assert_eq!(store.ids_named("k").len(), 1);
    assert_eq!(&adapter.read("k").await.unwrap()[..], b"three");
}

#[tokio::test]
async fn test_empty_write_changes_nothing() {
    let (store, adapter) = setup();
    adapter.write("kept.txt", b"still here").await.unwrap();
    let before = store.stats();

    assert_eq!(adapter.write("kept.txt", b"").await.unwrap(), 0);
    assert_eq!(adapter.write("new.txt", b"").await.unwrap(), 0);

    assert_eq!(store.stats(), before);
    assert_eq!(&adapter.read("kept.txt").await.unwrap()[..], b"still here");
    assert!(!adapter.exists("new.txt").await.unwrap());
}

#[tokio::test]
async fn test_content_type_is_sniffed_from_bytes() {
    let (_store, adapter) = setup();

    let mut png = PNG_HEADER.to_vec();
    png.extend_from_slice(&[0u8; 32]);
    // The key's extension does not matter for whole-object writes
    adapter.write("images/avatar.txt", &png).await.unwrap();
    adapter.write("notes/readme", b"just some words\n").await.unwrap();
    adapter.write("raw/blob", &[0x13u8, 0x37, 0x00, 0xC3, 0x28]).await.unwrap();

    let content_type = |record: Option<dog_gridfs::ObjectRecord>| {
        record.and_then(|r| r.content_type().map(str::to_string))
    };
    assert_eq!(
        content_type(adapter.metadata("images/avatar.txt").await.unwrap()).as_deref(),
        Some("image/png")
    );
    assert_eq!(
        content_type(adapter.metadata("notes/readme").await.unwrap()).as_deref(),
        Some("text/plain")
    );
    assert_eq!(
        content_type(adapter.metadata("raw/blob").await.unwrap()).as_deref(),
        Some("application/octet-stream")
    );
}

#[tokio::test]
async fn test_missing_key() {
    let (_store, adapter) = setup();

    let err = adapter.read("nope").await.unwrap_err();
    assert!(matches!(err, BlobError::NotFound { .. }));
    assert!(!adapter.exists("nope").await.unwrap());
    assert!(adapter.metadata("nope").await.unwrap().is_none());
    assert!(!adapter.delete("nope").await.unwrap());
}

#[tokio::test]
async fn test_delete() {
    let (store, adapter) = setup();
    adapter.write("gone", b"bye").await.unwrap();

    assert!(adapter.delete("/gone").await.unwrap());
    assert!(!adapter.exists("gone").await.unwrap());
    assert!(store.is_empty());
    assert!(!adapter.delete("gone").await.unwrap());
}

#[tokio::test]
async fn test_rename() {
    let (store, adapter) = setup();

    assert!(!adapter.rename("missing", "anywhere").await.unwrap());
    assert_eq!(store.stats().renames, 0);

    adapter.write("from", b"moving").await.unwrap();
    let id = store.ids_named("from")[0].clone();

    assert!(adapter.rename("/from", "to").await.unwrap());
    assert!(!adapter.exists("from").await.unwrap());
    assert_eq!(store.ids_named("to"), vec![id]);
    assert_eq!(&adapter.read("to").await.unwrap()[..], b"moving");

    // Renaming onto itself keeps the blob
    assert!(adapter.rename("to", "/to").await.unwrap());
    assert_eq!(&adapter.read("to").await.unwrap()[..], b"moving");
}

#[tokio::test]
async fn test_rename_replaces_target() {
    let (store, adapter) = setup();
    adapter.write("source", b"new").await.unwrap();
    adapter.write("target", b"old").await.unwrap();

    assert!(adapter.rename("source", "target").await.unwrap());
    assert_eq!(store.ids_named("target").len(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(&adapter.read("target").await.unwrap()[..], b"new");
}

#[tokio::test]
async fn test_failed_write_commits_nothing() {
    let (store, adapter) = setup();
    store.fail_writes(true);

    let result = adapter.write("broken", b"payload").await;
    assert!(matches!(result, Err(BlobError::Io { .. })));
    assert!(store.is_empty());
    assert_eq!(store.stats().uploads_opened, 1);
    assert_eq!(store.stats().uploads_committed, 0);

    store.fail_writes(false);
    adapter.write("broken", b"payload").await.unwrap();
    assert_eq!(&adapter.read("broken").await.unwrap()[..], b"payload");
}

#[tokio::test]
async fn test_failed_read_is_an_error() {
    let (store, adapter) = setup();
    adapter.write("k", b"abc").await.unwrap();

    store.fail_reads(true);
    assert!(adapter.read("k").await.is_err());
}

#[tokio::test]
async fn test_list_by_prefix() {
    let (_store, adapter) = setup();
    for key in ["ns/a", "ns/b", "ns/deep/c", "other/d", "nsx"] {
        adapter.write(key, b"x").await.unwrap();
    }

    let names: Vec<String> = adapter
        .list("/ns/")
        .await
        .unwrap()
        .map(|name| name.unwrap())
        .collect()
        .await;
    assert_eq!(names, vec!["ns/a", "ns/b", "ns/deep/c"]);
}

#[tokio::test]
async fn test_stream_shares_the_store() {
    let (_store, adapter) = setup();
    adapter.write("shared", b"0123456789").await.unwrap();

    let mut stream = adapter.stream("/shared");
    assert_eq!(stream.key().as_str(), "shared");
    stream.open(dog_gridfs::StreamMode::read()).await.unwrap();
    assert_eq!(stream.stat().unwrap().size, 10);

    assert!(adapter.store().find_one("shared").await.unwrap().is_some());
    assert_eq!(adapter.config().chunk_size_bytes, 16);
}

#[tokio::test]
async fn test_ping_memory_store() {
    let (_store, adapter) = setup();
    adapter.ping().await.unwrap();
}
