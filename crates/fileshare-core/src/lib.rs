//! Fileshare Core Library
//!
//! Shared building blocks for the file processing worker: configuration,
//! the error taxonomy, domain models (processing context, queue events,
//! metadata documents), hybrid encryption and content hashing.

pub mod config;
pub mod encryption;
pub mod error;
pub mod hashing;
pub mod models;
pub mod storage_types;

pub use config::{AmqpConfig, Config, DatabaseConfig, EncryptionConfig, StorageConfig};
pub use encryption::{HybridEncryptionService, KeyStore};
pub use error::{CryptoError, CryptoResult};
pub use hashing::{sha256_bytes, sha256_file, HASH_ALGORITHM};
pub use models::{
    FileMetadataDocument, FileProcessedEvent, FileProcessingStatus, FileUploadedEvent,
    ProcessingContext, FILE_PROCESSED_EVENT_TYPE,
};
pub use storage_types::StorageBackend;
