use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{AsyncReadExt, AsyncWriteExt, StreamExt};
use mongodb::bson::{doc, oid, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, GridFsErrorKind};
use mongodb::gridfs::{FilesCollectionDocument, GridFsBucket, GridFsDownloadStream, GridFsUploadStream};
use mongodb::options::GridFsBucketOptions;
use mongodb::{Client, Database};
use tracing::info;

use crate::{
    BlobError, BlobResult, FilenameStream, GridFsDsn, Metadata, ObjectId, ObjectRecord,
    ObjectStore, ReadChannel, StoreConfig, UploadMetadata, WriteChannel,
};

/// [`ObjectStore`] backed by a MongoDB GridFS bucket.
///
/// Object ids are GridFS `_id`s: ObjectIds travel as their hex string, any
/// other id type as a plain string.
#[derive(Clone)]
pub struct GridFsStore {
    database: Database,
    bucket: GridFsBucket,
}

impl GridFsStore {
    /// Connect using a `gridfs:mongodb://…/{database}` connection string
    pub async fn connect(dsn: &GridFsDsn, config: &StoreConfig) -> BlobResult<Self> {
        let client = Client::with_uri_str(dsn.uri())
            .await
            .map_err(BlobError::backend)?;
        let store = Self::from_database(client.database(dsn.database()), config);
        info!(database = dsn.database(), bucket = %config.bucket_name, "connected to GridFS");
        Ok(store)
    }

    /// Wrap an existing database handle
    pub fn from_database(database: Database, config: &StoreConfig) -> Self {
        let chunk_size = u32::try_from(config.chunk_size_bytes).unwrap_or(u32::MAX);
        let options = GridFsBucketOptions::builder()
            .bucket_name(config.bucket_name.clone())
            .chunk_size_bytes(chunk_size)
            .build();
        let bucket = database.gridfs_bucket(options);
        Self { database, bucket }
    }

    pub fn bucket(&self) -> &GridFsBucket {
        &self.bucket
    }
}

fn to_bson_id(id: &ObjectId) -> Bson {
    match oid::ObjectId::parse_str(id.as_str()) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(id.as_str().to_string()),
    }
}

fn from_bson_id(id: &Bson) -> ObjectId {
    match id {
        Bson::ObjectId(oid) => ObjectId::from_string(oid.to_hex()),
        Bson::String(s) => ObjectId::from_string(s.clone()),
        other => ObjectId::from_string(other.to_string()),
    }
}

fn to_record(file: FilesCollectionDocument) -> ObjectRecord {
    let metadata = file
        .metadata
        .map(|doc| Bson::Document(doc).into_relaxed_extjson())
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default();

    ObjectRecord {
        id: from_bson_id(&file.id),
        filename: file.filename.unwrap_or_default(),
        length: file.length,
        upload_date: chrono::DateTime::from_timestamp_millis(file.upload_date.timestamp_millis())
            .unwrap_or_default(),
        metadata,
    }
}

/// Newest revision first, the order `open_download_stream_by_name` reads
fn newest_first() -> Document {
    doc! { "uploadDate": -1, "_id": -1 }
}

fn to_document(metadata: &Metadata) -> BlobResult<Document> {
    mongodb::bson::to_document(metadata).map_err(BlobError::backend)
}

fn map_error(key: &str, err: MongoError) -> BlobError {
    match err.kind.as_ref() {
        ErrorKind::GridFs(GridFsErrorKind::FileNotFound { .. }) => BlobError::not_found(key),
        _ => BlobError::backend(err),
    }
}

#[async_trait]
impl ObjectStore for GridFsStore {
    async fn find_one(&self, filename: &str) -> BlobResult<Option<ObjectRecord>> {
        let file = self
            .bucket
            .find_one(doc! { "filename": filename })
            .sort(newest_first())
            .await
            .map_err(BlobError::backend)?;
        Ok(file.map(to_record))
    }

    async fn delete(&self, id: &ObjectId) -> BlobResult<()> {
        self.bucket
            .delete(to_bson_id(id))
            .await
            .map_err(|err| map_error(id.as_str(), err))
    }

    async fn open_upload_channel(
        &self,
        filename: &str,
        metadata: UploadMetadata,
    ) -> BlobResult<Box<dyn WriteChannel>> {
        let document = to_document(&metadata.into_document())?;
        let stream = self
            .bucket
            .open_upload_stream(filename)
            .metadata(document)
            .await
            .map_err(BlobError::backend)?;

        Ok(Box::new(GridFsUploadChannel {
            id: from_bson_id(stream.id()),
            stream: Some(stream),
        }))
    }

    async fn open_download_channel(&self, filename: &str) -> BlobResult<Box<dyn ReadChannel>> {
        let stream = self
            .bucket
            .open_download_stream_by_name(filename)
            .await
            .map_err(|err| map_error(filename, err))?;

        Ok(Box::new(GridFsDownloadChannel {
            stream: Some(stream),
        }))
    }

    async fn rename(&self, id: &ObjectId, new_filename: &str) -> BlobResult<()> {
        self.bucket
            .rename(to_bson_id(id), new_filename)
            .await
            .map_err(|err| map_error(id.as_str(), err))
    }

    async fn find_by_prefix(&self, prefix: &str) -> BlobResult<FilenameStream> {
        let pattern = format!("^{}", regex::escape(prefix));
        let cursor = self
            .bucket
            .find(doc! { "filename": { "$regex": pattern } })
            .await
            .map_err(BlobError::backend)?;

        Ok(Box::pin(cursor.map(|file| {
            file.map(|file| file.filename.unwrap_or_default())
                .map_err(BlobError::backend)
        })))
    }

    async fn ping(&self) -> BlobResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(BlobError::backend)?;
        Ok(())
    }
}

struct GridFsUploadChannel {
    id: ObjectId,
    stream: Option<GridFsUploadStream>,
}

#[async_trait]
impl WriteChannel for GridFsUploadChannel {
    fn id(&self) -> &ObjectId {
        &self.id
    }

    async fn write(&mut self, data: &[u8]) -> BlobResult<usize> {
        let stream = self.stream.as_mut().ok_or(BlobError::ChannelClosed)?;
        stream.write_all(data).await?;
        Ok(data.len())
    }

    async fn close(&mut self) -> BlobResult<()> {
        let mut stream = self.stream.take().ok_or(BlobError::ChannelClosed)?;
        stream.close().await?;
        Ok(())
    }

    async fn abort(&mut self) -> BlobResult<()> {
        let mut stream = self.stream.take().ok_or(BlobError::ChannelClosed)?;
        stream.abort().await.map_err(BlobError::backend)
    }
}

struct GridFsDownloadChannel {
    stream: Option<GridFsDownloadStream>,
}

#[async_trait]
impl ReadChannel for GridFsDownloadChannel {
    async fn read(&mut self, max: usize) -> BlobResult<Bytes> {
        let stream = self.stream.as_mut().ok_or(BlobError::ChannelClosed)?;
        let mut buf = vec![0u8; max];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    async fn close(&mut self) -> BlobResult<()> {
        self.stream.take();
        Ok(())
    }
}
