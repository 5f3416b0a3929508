use crate::{BlobError, BlobResult};

/// Environment variable [`GridFsDsn::from_env`] reads
pub const DSN_ENV_VAR: &str = "GRIDFS_DSN";

/// Scheme prefix of the documented connection string form
pub const DSN_SCHEME: &str = "gridfs:";

/// GridFS's own default chunk size (255 KiB)
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 255 * 1024;

/// A parsed `gridfs:{mongodb connection string}` value.
///
/// The database is the last path segment of the MongoDB URI, e.g.
/// `gridfs:mongodb://127.0.0.1:27017/media` names database `media`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridFsDsn {
    uri: String,
    database: String,
}

impl GridFsDsn {
    /// Parse a connection string, with or without the `gridfs:` prefix
    pub fn parse(dsn: &str) -> BlobResult<Self> {
        let uri = dsn.strip_prefix(DSN_SCHEME).unwrap_or(dsn).trim();

        let rest = uri
            .strip_prefix("mongodb://")
            .or_else(|| uri.strip_prefix("mongodb+srv://"))
            .ok_or_else(|| BlobError::invalid_dsn(dsn, "expected a mongodb:// URI"))?;

        let (_, database) = rest
            .rsplit_once('/')
            .ok_or_else(|| BlobError::invalid_dsn(dsn, "missing database name"))?;

        if database.is_empty() {
            return Err(BlobError::invalid_dsn(dsn, "missing database name"));
        }
        if !database.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(BlobError::invalid_dsn(
                dsn,
                format!("invalid database name {:?}", database),
            ));
        }

        Ok(Self {
            uri: uri.to_string(),
            database: database.to_string(),
        })
    }

    /// Parse the connection string held in `GRIDFS_DSN`
    pub fn from_env() -> BlobResult<Self> {
        let dsn = std::env::var(DSN_ENV_VAR).map_err(|_| {
            BlobError::invalid(format!("{} environment variable required", DSN_ENV_VAR))
        })?;
        Self::parse(&dsn)
    }

    /// The MongoDB connection URI
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

impl std::str::FromStr for GridFsDsn {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for GridFsDsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", DSN_SCHEME, self.uri)
    }
}

/// Configuration for stores and streams
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Bucket (collection prefix) holding `{bucket}.files` and `{bucket}.chunks`
    pub bucket_name: String,

    /// Size of the chunks new objects are split into
    pub chunk_size_bytes: usize,

    /// Upper bound on bytes held at once while advancing a read channel
    pub skip_batch_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket_name: "fs".to_string(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            skip_batch_bytes: 64 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bucket name
    pub fn with_bucket_name<S: Into<String>>(mut self, name: S) -> Self {
        self.bucket_name = name.into();
        self
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size_bytes = bytes;
        self
    }

    /// Set skip batch size
    pub fn with_skip_batch(mut self, bytes: usize) -> Self {
        self.skip_batch_bytes = bytes;
        self
    }
}
