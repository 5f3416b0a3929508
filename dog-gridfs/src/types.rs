use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

use crate::BlobResult;

/// Stream of stored filenames, as produced by a prefix search
pub type FilenameStream = Pin<Box<dyn Stream<Item = BlobResult<String>> + Send>>;

/// Metadata document attached to a stored object
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the MIME type of a stored object
pub const CONTENT_TYPE_FIELD: &str = "contentType";

/// Opaque store-side identifier of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl ObjectId {
    /// Generate a new random object ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the store knows about one stored object.
///
/// Only the id, length, upload date and metadata are ever fetched; chunk data
/// stays in the store until a download channel asks for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub filename: String,
    pub length: u64,
    pub upload_date: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ObjectRecord {
    /// The stored MIME type, if the uploader recorded one
    pub fn content_type(&self) -> Option<&str> {
        self.metadata
            .get(CONTENT_TYPE_FIELD)
            .and_then(|value| value.as_str())
    }
}

/// Metadata sent along when an upload channel is opened
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMetadata {
    pub content_type: String,
    pub extra: Metadata,
}

impl UploadMetadata {
    pub fn new<S: Into<String>>(content_type: S) -> Self {
        Self {
            content_type: content_type.into(),
            extra: Metadata::new(),
        }
    }

    pub fn with_field<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Flatten into the metadata document stored with the object
    pub fn into_document(self) -> Metadata {
        let mut doc = self.extra;
        doc.insert(
            CONTENT_TYPE_FIELD.to_string(),
            serde_json::Value::String(self.content_type),
        );
        doc
    }
}

/// POSIX-like file status of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStat {
    pub size: u64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    /// Regular file, rw-rw-r--
    pub mode: u32,
    pub nlink: u32,
}

impl BlobStat {
    pub const REGULAR_FILE_MODE: u32 = 0o100664;

    pub fn from_record(record: &ObjectRecord) -> Self {
        Self {
            size: record.length,
            atime: record.upload_date,
            mtime: record.upload_date,
            ctime: record.upload_date,
            mode: Self::REGULAR_FILE_MODE,
            nlink: 1,
        }
    }
}
