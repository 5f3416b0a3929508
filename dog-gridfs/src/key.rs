//! Key normalisation.
//!
//! Clients may address blobs as `/media/a.png` or `media/a.png`; both name the
//! same object. Every operation that reaches the store goes through
//! [`normalize_key`] first so the stored `filename` never carries a leading
//! separator.

use serde::{Deserialize, Serialize};

/// Path separator stripped from the front of client keys
pub const SEPARATOR: char = '/';

/// Strip all leading path separators from `key`.
///
/// Idempotent and infallible; never looks at store state.
pub fn normalize_key(key: &str) -> &str {
    key.trim_start_matches(SEPARATOR)
}

/// A normalised blob key (the store-side `filename`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobKey(String);

impl BlobKey {
    /// Normalise a client-supplied key
    pub fn new<S: AsRef<str>>(raw: S) -> Self {
        Self(normalize_key(raw.as_ref()).to_string())
    }

    /// Build `"{namespace}/{key}"` for multi-tenant deployments
    pub fn namespaced<N: AsRef<str>, K: AsRef<str>>(namespace: N, key: K) -> Self {
        let namespace = normalize_key(namespace.as_ref()).trim_end_matches(SEPARATOR);
        Self::new(format!("{}{}{}", namespace, SEPARATOR, normalize_key(key.as_ref())))
    }

    /// The key relative to `namespace`, if it lives under it
    pub fn strip_namespace(&self, namespace: &str) -> Option<&str> {
        let namespace = normalize_key(namespace).trim_end_matches(SEPARATOR);
        self.0
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension of the last path segment, if any
    pub fn extension(&self) -> Option<&str> {
        let name = self.0.rsplit(SEPARATOR).next()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for BlobKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlobKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for BlobKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
