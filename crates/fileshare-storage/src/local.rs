use crate::traits::{ObjectStorage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Local filesystem storage implementation
///
/// Each bucket is a directory under `base_path`; object keys map to relative
/// paths inside it.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory holding one directory per bucket (e.g., "/var/lib/fileshare/objects")
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        if bucket.is_empty()
            || bucket.contains(['/', '\\'])
            || bucket.chars().all(|c| c == '.')
        {
            return Err(StorageError::InvalidBucket(bucket.to_string()));
        }
        Ok(self.base_path.join(bucket))
    }

    /// Convert a bucket and object key to a filesystem path with security validation
    ///
    /// Only plain path components are accepted, so a key can never climb out
    /// of its bucket directory.
    fn key_to_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let only_normal = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !only_normal {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid path components".to_string(),
            ));
        }

        Ok(self.bucket_path(bucket)?.join(relative))
    }

    async fn require_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        let path = self.bucket_path(bucket)?;
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(format!("bucket {}", bucket)));
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        let path = self.bucket_path(bucket)?;
        if fs::try_exists(&path).await? {
            return Ok(());
        }

        fs::create_dir_all(&path).await?;
        tracing::info!(bucket = %bucket, path = %path.display(), "Local bucket created");
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> StorageResult<u64> {
        self.require_bucket(bucket).await?;
        let target = self.key_to_path(bucket, key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let start = std::time::Instant::now();

        // Copy next to the target and rename so readers never see a half-written object.
        let staging = target.with_file_name(format!(".upload-{}", Uuid::new_v4()));
        let size = match fs::copy(path, &staging).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to copy {} to {}: {}",
                    path.display(),
                    target.display(),
                    e
                )));
            }
        };
        fs::rename(&staging, &target).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to move {}: {}", target.display(), e))
        })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(size)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn source_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_local_storage_upload() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("objects")).await.unwrap();
        let src = source_file(dir.path(), "test.txt", b"Hello, World!").await;

        storage.ensure_bucket("original-files").await.unwrap();
        let size = storage
            .upload_file("original-files", "u/2024/01/01/f/test.txt", &src, "text/plain")
            .await
            .unwrap();
        assert_eq!(size, 13);

        let stored = fs::read(dir.path().join("objects/original-files/u/2024/01/01/f/test.txt"))
            .await
            .unwrap();
        assert_eq!(stored, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_ensure_bucket_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        storage.ensure_bucket("encrypted-files").await.unwrap();
        storage.ensure_bucket("encrypted-files").await.unwrap();
        assert!(dir.path().join("encrypted-files").is_dir());
    }

    #[tokio::test]
    async fn test_upload_requires_bucket() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("objects")).await.unwrap();
        let src = source_file(dir.path(), "a.txt", b"a").await;

        let result = storage.upload_file("missing", "a.txt", &src, "text/plain").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reupload_overwrites() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("objects")).await.unwrap();
        storage.ensure_bucket("b1").await.unwrap();

        let first = source_file(dir.path(), "v1", b"first").await;
        let second = source_file(dir.path(), "v2", b"second version").await;
        storage.upload_file("b1", "k/obj", &first, "text/plain").await.unwrap();
        storage.upload_file("b1", "k/obj", &second, "text/plain").await.unwrap();

        let data = fs::read(dir.path().join("objects/b1/k/obj")).await.unwrap();
        assert_eq!(data, b"second version");

        let mut entries = fs::read_dir(dir.path().join("objects/b1/k")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("obj")]);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.ensure_bucket("b1").await.unwrap();

        let src = source_file(dir.path(), "payload.txt", b"x").await;

        let result = storage
            .upload_file("b1", "../../../etc/passwd", &src, "text/plain")
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.upload_file("b1", "/etc/passwd", &src, "text/plain").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.ensure_bucket("../escape").await;
        assert!(matches!(result, Err(StorageError::InvalidBucket(_))));
    }
}
