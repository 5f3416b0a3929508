use async_trait::async_trait;
use bytes::Bytes;

use crate::{BlobResult, FilenameStream, ObjectId, ObjectRecord, UploadMetadata};

/// The chunked object store this crate is built on.
///
/// Shaped after a GridFS bucket: a files collection of [`ObjectRecord`]s plus
/// chunk data reached only through channels. The store does not enforce
/// unique filenames; `BlobStream` and `BlobAdapter` do, by deleting before
/// every upload.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Look up the newest record stored under `filename`, the one a download
    /// channel for that name reads.
    ///
    /// Never touches chunk data.
    async fn find_one(&self, filename: &str) -> BlobResult<Option<ObjectRecord>>;

    /// Delete an object and its chunks by id
    async fn delete(&self, id: &ObjectId) -> BlobResult<()>;

    /// Start a new object under `filename`.
    ///
    /// The object becomes visible to lookups once the channel is closed.
    async fn open_upload_channel(
        &self,
        filename: &str,
        metadata: UploadMetadata,
    ) -> BlobResult<Box<dyn WriteChannel>>;

    /// Open the object stored under `filename` for sequential reading
    async fn open_download_channel(&self, filename: &str) -> BlobResult<Box<dyn ReadChannel>>;

    /// Change the filename of an object in place
    async fn rename(&self, id: &ObjectId, new_filename: &str) -> BlobResult<()>;

    /// Every stored filename starting with `prefix`
    async fn find_by_prefix(&self, prefix: &str) -> BlobResult<FilenameStream>;

    /// Check that the store is reachable
    async fn ping(&self) -> BlobResult<()> {
        Ok(())
    }
}

/// Sequential download handle for one object
#[async_trait]
pub trait ReadChannel: Send {
    /// Read at most `max` bytes; an empty result means end of object.
    ///
    /// May return fewer bytes than asked for (e.g. at a chunk boundary).
    async fn read(&mut self, max: usize) -> BlobResult<Bytes>;

    /// Release the handle
    async fn close(&mut self) -> BlobResult<()>;
}

/// Sequential upload handle for one new object
#[async_trait]
pub trait WriteChannel: Send {
    /// Id the object will be stored under
    fn id(&self) -> &ObjectId;

    /// Append `data`, returning how many bytes were accepted
    async fn write(&mut self, data: &[u8]) -> BlobResult<usize>;

    /// Commit the object and release the handle
    async fn close(&mut self) -> BlobResult<()>;

    /// Discard everything written and release the handle
    async fn abort(&mut self) -> BlobResult<()>;
}
