use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, instrument, warn};

use crate::sniff::sniff_content;
use crate::{
    BlobKey, BlobResult, BlobStream, FilenameStream, ObjectRecord, ObjectStore, StoreConfig,
    UploadMetadata,
};

/// Read size used when draining a download channel
const READ_BATCH_BYTES: usize = 64 * 1024;

/// Whole-object blob operations over an [`ObjectStore`].
///
/// Every key is normalised before use, so `/a/b` and `a/b` are the same blob.
/// Writes replace: whatever is stored under the key is deleted before the new
/// upload starts. That delete and the upload are separate store calls, so two
/// concurrent writers to one key can still leave two records; callers that
/// need a single writer per key must serialise above this layer.
pub struct BlobAdapter {
    store: Arc<dyn ObjectStore>,
    config: StoreConfig,
}

impl BlobAdapter {
    /// Create a new blob adapter
    pub fn new<S: ObjectStore + 'static>(store: S, config: StoreConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
        }
    }

    /// Create from an already shared store handle
    pub fn from_shared(store: Arc<dyn ObjectStore>, config: StoreConfig) -> Self {
        Self { store, config }
    }

    /// Unopened stream bound to `key`
    pub fn stream(&self, key: &str) -> BlobStream {
        BlobStream::with_config(self.store.clone(), key, &self.config)
    }

    /// Whole content of the blob stored under `key`
    #[instrument(skip(self))]
    pub async fn read(&self, key: &str) -> BlobResult<Bytes> {
        let key = BlobKey::new(key);
        let mut channel = self.store.open_download_channel(key.as_str()).await?;

        let mut content = BytesMut::new();
        let drained = loop {
            match channel.read(READ_BATCH_BYTES).await {
                Ok(bytes) if bytes.is_empty() => break Ok(()),
                Ok(bytes) => content.extend_from_slice(&bytes),
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = channel.close().await {
            warn!(key = %key, error = %err, "failed to close download channel");
        }
        drained?;

        debug!(key = %key, size = content.len(), "blob read");
        Ok(content.freeze())
    }

    /// Store `content` under `key`, replacing any existing blob.
    ///
    /// Empty content is a no-op returning 0: nothing is deleted and no
    /// zero-length object is created.
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub async fn write(&self, key: &str, content: &[u8]) -> BlobResult<usize> {
        if content.is_empty() {
            return Ok(0);
        }

        let key = BlobKey::new(key);
        self.purge(&key).await?;

        let metadata = UploadMetadata::new(sniff_content(content));
        let mut channel = self
            .store
            .open_upload_channel(key.as_str(), metadata)
            .await?;

        match channel.write(content).await {
            Ok(written) => {
                channel.close().await?;
                debug!(key = %key, id = %channel.id(), written, "blob written");
                Ok(written)
            }
            Err(err) => {
                if let Err(abort_err) = channel.abort().await {
                    warn!(key = %key, error = %abort_err, "failed to abort upload channel");
                }
                Err(err)
            }
        }
    }

    /// Whether a blob is stored under `key`
    pub async fn exists(&self, key: &str) -> BlobResult<bool> {
        Ok(self.metadata(key).await?.is_some())
    }

    /// Stored record for `key`, without its content
    pub async fn metadata(&self, key: &str) -> BlobResult<Option<ObjectRecord>> {
        self.store.find_one(BlobKey::new(key).as_str()).await
    }

    /// Delete the blob under `key`; `false` if there was none
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> BlobResult<bool> {
        let key = BlobKey::new(key);
        match self.store.find_one(key.as_str()).await? {
            Some(record) => {
                self.store.delete(&record.id).await?;
                debug!(key = %key, id = %record.id, "blob deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Move the blob under `source` to `target`; `false` if `source` is missing.
    ///
    /// A blob already stored under `target` is deleted first.
    #[instrument(skip(self))]
    pub async fn rename(&self, source: &str, target: &str) -> BlobResult<bool> {
        let source = BlobKey::new(source);
        let target = BlobKey::new(target);

        let Some(record) = self.store.find_one(source.as_str()).await? else {
            return Ok(false);
        };
        if source == target {
            return Ok(true);
        }

        self.purge(&target).await?;
        self.store.rename(&record.id, target.as_str()).await?;
        debug!(from = %source, to = %target, id = %record.id, "blob renamed");

        Ok(true)
    }

    /// Every stored filename under `prefix` (normalised)
    pub async fn list(&self, prefix: &str) -> BlobResult<FilenameStream> {
        self.store.find_by_prefix(BlobKey::new(prefix).as_str()).await
    }

    /// Check that the store is reachable
    pub async fn ping(&self) -> BlobResult<()> {
        self.store.ping().await
    }

    /// Get configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared handle to the underlying store
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Delete every record stored under `key`
    async fn purge(&self, key: &BlobKey) -> BlobResult<usize> {
        let mut removed = 0;
        while let Some(record) = self.store.find_one(key.as_str()).await? {
            self.store.delete(&record.id).await?;
            removed += 1;
        }
        if removed > 0 {
            debug!(key = %key, removed, "replaced existing blob");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for BlobAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobAdapter")
            .field("config", &self.config)
            .finish()
    }
}
