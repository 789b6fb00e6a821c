//! Object store trait and key validation.

use async_trait::async_trait;

use super::error::StorageError;

/// Durable key-addressed blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the name of this backend.
    fn name(&self) -> &str;

    /// Read the whole object.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Write (or replace) the object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Whether an object is stored under `key`.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Check that `key` is a relative, `/`-separated key with no empty or
/// parent segments.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = |reason| {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("key is empty");
    }
    if key.starts_with('/') {
        return invalid("key must be relative");
    }
    if key.contains('\\') || key.contains('\0') {
        return invalid("key contains a forbidden character");
    }
    for segment in key.split('/') {
        if segment.is_empty() {
            return invalid("key contains an empty segment");
        }
        if segment == ".." || segment == "." {
            return invalid("key contains a relative segment");
        }
    }
    Ok(())
}
