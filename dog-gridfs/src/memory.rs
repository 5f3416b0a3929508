use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::{
    BlobError, BlobResult, FilenameStream, ObjectId, ObjectRecord, ObjectStore, ReadChannel,
    StoreConfig, UploadMetadata, WriteChannel,
};

/// Operation counters, for asserting what a caller did to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub lookups: u64,
    pub deletes: u64,
    pub renames: u64,
    pub uploads_opened: u64,
    pub uploads_committed: u64,
    pub downloads_opened: u64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_writes: bool,
    fail_reads: bool,
    fail_commits: bool,
}

#[derive(Debug, Clone)]
struct FileDoc {
    record: ObjectRecord,
    /// Commit order, newest wins on name lookups
    seq: u64,
}

struct Inner {
    chunk_size: usize,
    files: RwLock<HashMap<ObjectId, FileDoc>>,
    chunks: RwLock<HashMap<ObjectId, Vec<Bytes>>>,
    next_seq: Mutex<u64>,
    stats: Mutex<StoreStats>,
    faults: Mutex<Faults>,
}

impl Inner {
    fn newest_named(&self, filename: &str) -> Option<ObjectRecord> {
        self.files
            .read()
            .values()
            .filter(|doc| doc.record.filename == filename)
            .max_by_key(|doc| doc.seq)
            .map(|doc| doc.record.clone())
    }

    fn commit(&self, record: ObjectRecord) {
        let seq = {
            let mut next = self.next_seq.lock();
            *next += 1;
            *next
        };
        self.files
            .write()
            .insert(record.id.clone(), FileDoc { record, seq });
        self.stats.lock().uploads_committed += 1;
    }
}

/// In-process chunked object store for tests and embedding.
///
/// Objects are split into `chunk_size_bytes` chunks like a GridFS bucket. A
/// record becomes visible only when its upload channel is closed, and, as with
/// GridFS, nothing stops two records from sharing a filename. Cloning is cheap
/// and clones share state.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    inner: Arc<Inner>,
}

impl InMemoryObjectStore {
    /// Create an empty store with the default chunk size
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                chunk_size: config.chunk_size_bytes.max(1),
                files: RwLock::new(HashMap::new()),
                chunks: RwLock::new(HashMap::new()),
                next_seq: Mutex::new(0),
                stats: Mutex::new(StoreStats::default()),
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    /// Number of committed objects
    pub fn len(&self) -> usize {
        self.inner.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.files.read().is_empty()
    }

    /// Ids of every committed object stored under `filename`
    pub fn ids_named(&self, filename: &str) -> Vec<ObjectId> {
        let files = self.inner.files.read();
        let mut docs: Vec<&FileDoc> = files
            .values()
            .filter(|doc| doc.record.filename == filename)
            .collect();
        docs.sort_by_key(|doc| doc.seq);
        docs.into_iter().map(|doc| doc.record.id.clone()).collect()
    }

    /// Number of chunks held for `id`, committed or not
    pub fn chunk_count(&self, id: &ObjectId) -> usize {
        self.inner.chunks.read().get(id).map_or(0, Vec::len)
    }

    /// Store `data` under `filename` directly, without replacing anything.
    ///
    /// Bypasses the delete-before-write policy, so it can seed duplicates.
    pub fn insert_unchecked(&self, filename: &str, data: &[u8], metadata: UploadMetadata) -> ObjectId {
        let id = ObjectId::new();
        let chunks = data
            .chunks(self.inner.chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();
        self.inner.chunks.write().insert(id.clone(), chunks);
        self.inner.commit(ObjectRecord {
            id: id.clone(),
            filename: filename.to_string(),
            length: data.len() as u64,
            upload_date: Utc::now(),
            metadata: metadata.into_document(),
        });
        id
    }

    /// Snapshot of the operation counters
    pub fn stats(&self) -> StoreStats {
        self.inner.stats.lock().clone()
    }

    /// Make every channel write fail until switched off
    pub fn fail_writes(&self, fail: bool) {
        self.inner.faults.lock().fail_writes = fail;
    }

    /// Make every upload commit (`WriteChannel::close`) fail until switched
    /// off. The failed upload stays open and is discarded when dropped.
    pub fn fail_commits(&self, fail: bool) {
        self.inner.faults.lock().fail_commits = fail;
    }

    /// Make every channel read fail until switched off
    pub fn fail_reads(&self, fail: bool) {
        self.inner.faults.lock().fail_reads = fail;
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("chunk_size", &self.inner.chunk_size)
            .field("object_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn find_one(&self, filename: &str) -> BlobResult<Option<ObjectRecord>> {
        self.inner.stats.lock().lookups += 1;
        Ok(self.inner.newest_named(filename))
    }

    async fn delete(&self, id: &ObjectId) -> BlobResult<()> {
        self.inner.stats.lock().deletes += 1;
        self.inner.chunks.write().remove(id);
        match self.inner.files.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(BlobError::not_found(id.to_string())),
        }
    }

    async fn open_upload_channel(
        &self,
        filename: &str,
        metadata: UploadMetadata,
    ) -> BlobResult<Box<dyn WriteChannel>> {
        self.inner.stats.lock().uploads_opened += 1;
        Ok(Box::new(MemoryUploadChannel {
            store: self.inner.clone(),
            id: ObjectId::new(),
            filename: filename.to_string(),
            metadata: Some(metadata),
            pending: BytesMut::new(),
            length: 0,
            state: UploadState::Open,
        }))
    }

    async fn open_download_channel(&self, filename: &str) -> BlobResult<Box<dyn ReadChannel>> {
        self.inner.stats.lock().downloads_opened += 1;
        let record = self
            .inner
            .newest_named(filename)
            .ok_or_else(|| BlobError::not_found(filename))?;

        Ok(Box::new(MemoryDownloadChannel {
            store: self.inner.clone(),
            id: record.id,
            length: record.length,
            position: 0,
            closed: false,
        }))
    }

    async fn rename(&self, id: &ObjectId, new_filename: &str) -> BlobResult<()> {
        self.inner.stats.lock().renames += 1;
        let mut files = self.inner.files.write();
        let doc = files
            .get_mut(id)
            .ok_or_else(|| BlobError::not_found(id.to_string()))?;
        doc.record.filename = new_filename.to_string();
        Ok(())
    }

    async fn find_by_prefix(&self, prefix: &str) -> BlobResult<FilenameStream> {
        let mut names: Vec<String> = self
            .inner
            .files
            .read()
            .values()
            .filter(|doc| doc.record.filename.starts_with(prefix))
            .map(|doc| doc.record.filename.clone())
            .collect();
        names.sort();

        Ok(Box::pin(futures::stream::iter(names.into_iter().map(Ok))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadState {
    Open,
    Committed,
    Aborted,
}

/// Upload channel writing full chunks eagerly and the record on close
struct MemoryUploadChannel {
    store: Arc<Inner>,
    id: ObjectId,
    filename: String,
    metadata: Option<UploadMetadata>,
    pending: BytesMut,
    length: u64,
    state: UploadState,
}

impl MemoryUploadChannel {
    fn push_chunk(&self, chunk: Bytes) {
        self.store
            .chunks
            .write()
            .entry(self.id.clone())
            .or_default()
            .push(chunk);
    }

    fn discard_chunks(&self) {
        self.store.chunks.write().remove(&self.id);
    }
}

#[async_trait]
impl WriteChannel for MemoryUploadChannel {
    fn id(&self) -> &ObjectId {
        &self.id
    }

    async fn write(&mut self, data: &[u8]) -> BlobResult<usize> {
        if self.state != UploadState::Open {
            return Err(BlobError::ChannelClosed);
        }
        if self.store.faults.lock().fail_writes {
            return Err(std::io::Error::other("injected write failure").into());
        }

        self.pending.extend_from_slice(data);
        let chunk_size = self.store.chunk_size;
        while self.pending.len() >= chunk_size {
            let chunk = self.pending.split_to(chunk_size).freeze();
            self.push_chunk(chunk);
        }
        self.length += data.len() as u64;

        Ok(data.len())
    }

    async fn close(&mut self) -> BlobResult<()> {
        if self.state != UploadState::Open {
            return Err(BlobError::ChannelClosed);
        }
        if self.store.faults.lock().fail_commits {
            return Err(std::io::Error::other("injected commit failure").into());
        }

        if !self.pending.is_empty() {
            let tail = self.pending.split().freeze();
            self.push_chunk(tail);
        }

        let metadata = self
            .metadata
            .take()
            .map(UploadMetadata::into_document)
            .unwrap_or_default();

        self.store.commit(ObjectRecord {
            id: self.id.clone(),
            filename: self.filename.clone(),
            length: self.length,
            upload_date: Utc::now(),
            metadata,
        });
        self.state = UploadState::Committed;

        Ok(())
    }

    async fn abort(&mut self) -> BlobResult<()> {
        if self.state != UploadState::Open {
            return Err(BlobError::ChannelClosed);
        }
        self.discard_chunks();
        self.pending.clear();
        self.state = UploadState::Aborted;
        Ok(())
    }
}

impl Drop for MemoryUploadChannel {
    fn drop(&mut self) {
        // Never closed: the chunks have no record and are unreachable
        if self.state == UploadState::Open {
            self.discard_chunks();
        }
    }
}

/// Download channel walking an object's chunks in order
struct MemoryDownloadChannel {
    store: Arc<Inner>,
    id: ObjectId,
    length: u64,
    position: u64,
    closed: bool,
}

#[async_trait]
impl ReadChannel for MemoryDownloadChannel {
    async fn read(&mut self, max: usize) -> BlobResult<Bytes> {
        if self.closed {
            return Err(BlobError::ChannelClosed);
        }
        if self.store.faults.lock().fail_reads {
            return Err(std::io::Error::other("injected read failure").into());
        }
        if max == 0 || self.position >= self.length {
            return Ok(Bytes::new());
        }

        let chunk_size = self.store.chunk_size as u64;
        let index = (self.position / chunk_size) as usize;
        let within = (self.position % chunk_size) as usize;

        let chunk = self
            .store
            .chunks
            .read()
            .get(&self.id)
            .and_then(|chunks| chunks.get(index).cloned())
            .ok_or_else(|| BlobError::not_found(format!("{} chunk {}", self.id, index)))?;

        let end = chunk.len().min(within + max);
        let out = chunk.slice(within..end);
        self.position += out.len() as u64;

        Ok(out)
    }

    async fn close(&mut self) -> BlobResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn small_chunks() -> InMemoryObjectStore {
        InMemoryObjectStore::with_config(&StoreConfig::default().with_chunk_size(4))
    }

    async fn read_all(channel: &mut Box<dyn ReadChannel>) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let bytes = channel.read(3).await.unwrap();
            if bytes.is_empty() {
                return out;
            }
            out.extend_from_slice(&bytes);
        }
    }

    #[tokio::test]
    async fn test_upload_is_chunked_and_visible_after_close() {
        let store = small_chunks();
        let mut upload = store
            .open_upload_channel("a.txt", UploadMetadata::new("text/plain"))
            .await
            .unwrap();
        let id = upload.id().clone();

        assert_eq!(upload.write(b"hello ").await.unwrap(), 6);
        assert_eq!(upload.write(b"world").await.unwrap(), 5);
        assert!(store.find_one("a.txt").await.unwrap().is_none());
        assert_eq!(store.chunk_count(&id), 2);

        upload.close().await.unwrap();
        assert_eq!(store.chunk_count(&id), 3);

        let record = store.find_one("a.txt").await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.length, 11);
        assert_eq!(record.content_type(), Some("text/plain"));

        let mut download = store.open_download_channel("a.txt").await.unwrap();
        assert_eq!(read_all(&mut download).await, b"hello world");
    }

    #[tokio::test]
    async fn test_dropped_upload_leaves_nothing() {
        let store = small_chunks();
        let mut upload = store
            .open_upload_channel("a.txt", UploadMetadata::new("text/plain"))
            .await
            .unwrap();
        let id = upload.id().clone();
        upload.write(b"0123456789").await.unwrap();
        drop(upload);

        assert_eq!(store.chunk_count(&id), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_filenames_are_not_unique() {
        let store = small_chunks();
        let first = store.insert_unchecked("dup", b"one", UploadMetadata::new("text/plain"));
        let second = store.insert_unchecked("dup", b"two!", UploadMetadata::new("text/plain"));

        assert_eq!(store.ids_named("dup"), vec![first, second.clone()]);
        assert_eq!(store.find_one("dup").await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn test_delete_rename_and_prefix_search() {
        let store = small_chunks();
        let a = store.insert_unchecked("ns/a", b"a", UploadMetadata::new("text/plain"));
        store.insert_unchecked("ns/b", b"b", UploadMetadata::new("text/plain"));
        store.insert_unchecked("other/c", b"c", UploadMetadata::new("text/plain"));

        store.rename(&a, "ns/z").await.unwrap();
        let names: Vec<String> = store
            .find_by_prefix("ns/")
            .await
            .unwrap()
            .map(|name| name.unwrap())
            .collect()
            .await;
        assert_eq!(names, vec!["ns/b".to_string(), "ns/z".to_string()]);

        store.delete(&a).await.unwrap();
        assert!(store.delete(&a).await.is_err());
        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().deletes, 2);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = small_chunks();
        store.insert_unchecked("a", b"abc", UploadMetadata::new("text/plain"));

        store.fail_reads(true);
        let mut download = store.open_download_channel("a").await.unwrap();
        assert!(download.read(8).await.is_err());

        store.fail_writes(true);
        let mut upload = store
            .open_upload_channel("b", UploadMetadata::new("text/plain"))
            .await
            .unwrap();
        assert!(upload.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_nothing() {
        let store = small_chunks();
        let mut upload = store
            .open_upload_channel("c", UploadMetadata::new("text/plain"))
            .await
            .unwrap();
        let id = upload.id().clone();
        upload.write(b"0123456789").await.unwrap();

        store.fail_commits(true);
        assert!(upload.close().await.is_err());
        drop(upload);

        assert!(store.is_empty());
        assert_eq!(store.chunk_count(&id), 0);
        assert_eq!(store.stats().uploads_committed, 0);
    }
}
