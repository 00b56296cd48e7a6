use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use fileshare_core::ProcessingContext;
use fileshare_storage::{encrypted_object_key, object_key, ObjectStorage, StorageResult};
use tokio_util::sync::CancellationToken;

use super::order;
use crate::filter::{Filter, StageFault, StageResult};

const CIPHERTEXT_CONTENT_TYPE: &str = "application/octet-stream";

/// Stores the original in the originals bucket and the ciphertext, when
/// present, in the encrypted bucket.
pub struct ObjectStorageUploadFilter {
    storage: Arc<dyn ObjectStorage>,
    original_bucket: String,
    encrypted_bucket: String,
}

impl ObjectStorageUploadFilter {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        original_bucket: impl Into<String>,
        encrypted_bucket: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            original_bucket: original_bucket.into(),
            encrypted_bucket: encrypted_bucket.into(),
        }
    }

    async fn upload_original(&self, ctx: &mut ProcessingContext) -> StorageResult<()> {
        let key = object_key(ctx.user_id, ctx.partition_time(), ctx.file_id, &ctx.file_name);
        let size = self
            .storage
            .upload_file(&self.original_bucket, &key, &ctx.local_path, &ctx.content_type)
            .await?;

        tracing::info!(
            file_id = %ctx.file_id,
            bucket = %self.original_bucket,
            key = %key,
            size = size,
            "Original uploaded"
        );
        ctx.insert_metadata("originalBucket", self.original_bucket.clone());
        ctx.insert_metadata("originalObjectKey", key.clone());
        ctx.original_bucket = Some(self.original_bucket.clone());
        ctx.original_object_key = Some(key);
        Ok(())
    }

    async fn upload_encrypted(&self, ctx: &mut ProcessingContext) -> StorageResult<()> {
        let Some(encrypted_path) = ctx.encrypted_path.clone().filter(|_| ctx.is_encrypted) else {
            return Ok(());
        };

        let key = encrypted_object_key(ctx.user_id, ctx.partition_time(), ctx.file_id, &ctx.file_name);
        let size = self
            .storage
            .upload_file(&self.encrypted_bucket, &key, &encrypted_path, CIPHERTEXT_CONTENT_TYPE)
            .await?;

        tracing::info!(
            file_id = %ctx.file_id,
            bucket = %self.encrypted_bucket,
            key = %key,
            size = size,
            "Ciphertext uploaded"
        );
        ctx.insert_metadata("encryptedBucket", self.encrypted_bucket.clone());
        ctx.insert_metadata("encryptedObjectKey", key.clone());
        ctx.encrypted_bucket = Some(self.encrypted_bucket.clone());
        ctx.encrypted_object_key = Some(key);
        Ok(())
    }
}

#[async_trait]
impl Filter for ObjectStorageUploadFilter {
    fn name(&self) -> &'static str {
        "ObjectStorageUpload"
    }

    fn order(&self) -> u32 {
        order::UPLOAD
    }

    async fn process(&self, mut ctx: ProcessingContext, cancel: &CancellationToken) -> StageResult {
        let start = Instant::now();

        let buckets = [self.original_bucket.as_str(), self.encrypted_bucket.as_str()];
        for bucket in buckets {
            if let Err(e) = self.storage.ensure_bucket(bucket).await {
                ctx.add_error(format!("Object storage upload failed: {}", e));
                return Ok(ctx);
            }
        }

        if cancel.is_cancelled() {
            return Err(StageFault::cancelled(ctx));
        }
        if let Err(e) = self.upload_original(&mut ctx).await {
            tracing::error!(file_id = %ctx.file_id, error = %e, "Original upload failed");
            ctx.add_error(format!("Object storage upload failed: {}", e));
            return Ok(ctx);
        }

        if cancel.is_cancelled() {
            return Err(StageFault::cancelled(ctx));
        }
        if let Err(e) = self.upload_encrypted(&mut ctx).await {
            tracing::error!(file_id = %ctx.file_id, error = %e, "Ciphertext upload failed");
            ctx.add_error(format!("Object storage upload failed: {}", e));
            return Ok(ctx);
        }

        tracing::info!(
            file_id = %ctx.file_id,
            backend = %self.storage.backend_type(),
            duration_ms = %(start.elapsed().as_secs_f64() * 1000.0),
            "Object storage upload completed"
        );
        Ok(ctx)
    }
}
