//! Built-in pipeline stages.

mod cleanup;
mod decrypt_validate;
mod encrypt;
mod hash;
mod metadata;
mod persist;
mod upload;

pub use cleanup::CleanupFilter;
pub use decrypt_validate::DecryptValidationFilter;
pub use encrypt::EncryptionFilter;
pub use hash::HashFilter;
pub use metadata::{file_category, file_extension, MetadataFilter};
pub use persist::MetadataPersistenceFilter;
pub use upload::ObjectStorageUploadFilter;

/// Order keys of the built-in stages. Gaps leave room for custom stages.
pub mod order {
    pub const HASH: u32 = 10;
    pub const METADATA: u32 = 20;
    pub const ENCRYPT: u32 = 30;
    pub const DECRYPT_VALIDATE: u32 = 40;
    pub const UPLOAD: u32 = 50;
    pub const PERSIST: u32 = 900;
    pub const CLEANUP: u32 = 1000;
}

/// Remove a scratch file, treating "already gone" as success.
pub(crate) async fn remove_if_exists(path: &std::path::Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append a suffix to a path without replacing its extension.
pub(crate) fn with_suffix(path: &std::path::Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    std::path::PathBuf::from(name)
}
