//! Storage abstraction trait
//!
//! This module defines the ObjectStorage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid bucket name: {0}")]
    InvalidBucket(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Bucket-addressed object storage
///
/// Writes are whole-object puts keyed by `(bucket, key)`; writing the same
/// key twice replaces the object, which keeps redelivered messages idempotent.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Create the bucket if it does not exist yet. Succeeds when it already does.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Stream a local file into `bucket/key`. Returns the number of bytes stored.
    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<u64>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
