//! Error types for the object store.

use thiserror::Error;

/// Errors returned by object store backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object stored under the key.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// The key is not a valid relative object key.
    #[error("Invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// I/O failure while reading or writing the object.
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Whether a retry could succeed. Missing objects and bad keys are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
