//! Object storage behind the archive.
//!
//! Keys are `/`-separated strings. A store never interprets them beyond
//! prefix matching; partition semantics live in [`crate::domain::partition`].

pub mod local;
pub mod memory;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

use std::io;
use thiserror::Error;

/// A stored object as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectEntry {
    pub key: String,
    pub size_bytes: u64,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("storage access denied: {0}")]
    Unauthorized(String),

    #[error("storage I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Map an I/O error, treating permission problems as authorization failures.
    pub fn from_io(key: impl Into<String>, source: io::Error) -> Self {
        let key = key.into();
        match source.kind() {
            io::ErrorKind::PermissionDenied => {
                StorageError::Unauthorized(format!("{key}: {source}"))
            }
            io::ErrorKind::NotFound => StorageError::NotFound { key },
            _ => StorageError::Io { key, source },
        }
    }

    /// Worth retrying the same operation.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Stops the whole run: nothing else can succeed against this store.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Unauthorized(_))
    }
}

/// Key-value object store.
pub trait ObjectStore: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// All objects whose key starts with `prefix`, sorted by key.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError>;

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Write an object. Readers observe either the old object or the whole new one.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Reject keys that could escape the store root or alias another key.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.contains('\\')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
