//! # dog-gridfs: named blobs over a chunked object store
//!
//! `dog-gridfs` stores blobs under string keys in a GridFS-style store, where
//! every object is a files-collection record plus a run of fixed-size chunks.
//! It gives you two ways in:
//!
//! - **`BlobAdapter`**: whole-object `read` / `write` / `exists` / `delete` /
//!   `rename`, one call each.
//! - **`BlobStream`**: a seekable stream over one key that opens store channels
//!   lazily and never buffers the whole object.
//!
//! Both keep one record per key: a write deletes whatever is stored under the
//! key before uploading the replacement. The store itself does not enforce
//! that, and nothing here locks across writers, so concurrent writers to the
//! same key must be serialised by the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_gridfs::prelude::*;
//! use std::io::SeekFrom;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let adapter = BlobAdapter::new(InMemoryObjectStore::new(), StoreConfig::default());
//!
//! // Whole-object write and read; the leading '/' is ignored
//! adapter.write("/docs/hello.txt", b"Hello, world!").await?;
//! assert_eq!(&adapter.read("docs/hello.txt").await?[..], b"Hello, world!");
//!
//! // Partial reads through a stream
//! let mut stream = adapter.stream("docs/hello.txt");
//! stream.open(StreamMode::read()).await?;
//! stream.seek(SeekFrom::End(-6));
//! assert_eq!(&stream.read(5).await.into_value()[..], b"world");
//! stream.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  BlobAdapter   │  BlobStream  │  ← whole-object / seekable access
//! ├──────────────────────────────┤
//! │  key normalisation, sniffing │
//! ├──────────────────────────────┤
//! │         ObjectStore          │  ← GridFS bucket, in-memory, custom
//! └──────────────────────────────┘
//! ```
//!
//! Enable the `mongodb` feature for [`GridFsStore`], backed by a real GridFS
//! bucket.

pub mod adapter;
pub mod cleanup;
mod config;
mod error;
pub mod key;
mod memory;
mod mode;
#[cfg(feature = "mongodb")]
mod mongo;
pub mod sniff;
pub mod store;
pub mod stream;
mod types;

// Re-export main types for clean API
pub use adapter::BlobAdapter;
pub use cleanup::{CleanupReport, OrphanCleanup, ReferenceSource};
pub use config::{GridFsDsn, StoreConfig, DEFAULT_CHUNK_SIZE_BYTES, DSN_ENV_VAR};
pub use error::{BlobError, BlobResult, ModeViolation};
pub use key::{normalize_key, BlobKey};
pub use memory::{InMemoryObjectStore, StoreStats};
pub use mode::StreamMode;
#[cfg(feature = "mongodb")]
pub use mongo::GridFsStore;
pub use store::{ObjectStore, ReadChannel, WriteChannel};
pub use stream::{BlobStream, ChannelHandle, IoOutcome, NoOp, StreamPhase, MAX_OFFSET};
pub use types::{
    BlobStat, FilenameStream, Metadata, ObjectId, ObjectRecord, UploadMetadata,
    CONTENT_TYPE_FIELD,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobAdapter, BlobError, BlobKey, BlobResult, BlobStream, InMemoryObjectStore, IoOutcome,
        ObjectStore, StoreConfig, StreamMode,
    };
}
