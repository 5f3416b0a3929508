use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Why an `open` call was refused for the current existence state of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeViolation {
    /// The mode demands a new object but one already exists
    AlreadyExists,
    /// The mode demands an existing object but none exists
    Missing,
}

impl std::fmt::Display for ModeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeViolation::AlreadyExists => f.write_str("object already exists"),
            ModeViolation::Missing => f.write_str("object does not exist"),
        }
    }
}

/// Errors that can occur during blob operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Mode does not permit opening {key}: {reason}")]
    NotPermitted { key: String, reason: ModeViolation },

    #[error("Invalid GridFS connection string {dsn:?}: {reason}")]
    InvalidDsn { dsn: String, reason: String },

    #[error("Channel already closed")]
    ChannelClosed,

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl BlobError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a connection string error
    pub fn invalid_dsn<D: Into<String>, R: Into<String>>(dsn: D, reason: R) -> Self {
        Self::InvalidDsn {
            dsn: dsn.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a refused `open`
    pub fn is_not_permitted(&self) -> bool {
        matches!(self, BlobError::NotPermitted { .. })
    }
}
