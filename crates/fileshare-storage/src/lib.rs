//! Fileshare Storage Library
//!
//! Object storage abstraction used by the upload stage, with an S3-compatible
//! backend (AWS, MinIO) and a local filesystem backend.
//!
//! # Object key format
//!
//! Every backend stores objects under the same deterministic layout:
//!
//! - **Original**: `{user_id}/{yyyy}/{MM}/{dd}/{file_id}/{file_name}`
//! - **Ciphertext**: the original key plus `.encrypted`
//!
//! Keys are derived only from the upload event, so redelivering a message
//! overwrites the same objects instead of creating new ones. Key generation is
//! centralized in the `keys` module.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use fileshare_core::StorageBackend;
pub use keys::{encrypted_object_key, object_key, sanitize_file_name, ENCRYPTED_SUFFIX};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{ObjectStorage, StorageError, StorageResult};
