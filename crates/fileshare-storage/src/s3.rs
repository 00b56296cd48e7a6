use crate::traits::{ObjectStorage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use fileshare_core::StorageConfig;
use std::path::Path;

/// Region that must not be sent as an explicit location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// Static credentials from the configuration take precedence over the
    /// default AWS provider chain. Set `s3_endpoint` for MinIO and other
    /// S3-compatible providers (e.g., "http://localhost:9000").
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        let region = config.s3_region.clone();
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));

        match (&config.s3_access_key_id, &config.s3_secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "fileshare-static",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::ConfigError(
                    "S3 access key and secret key must be set together".to_string(),
                ))
            }
        }

        let shared = loader.load().await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.s3_force_path_style);
        if let Some(ref endpoint) = config.s3_endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }

        tracing::info!(
            region = %region,
            endpoint = config.s3_endpoint.as_deref().unwrap_or("aws"),
            force_path_style = config.s3_force_path_style,
            "S3 storage initialized"
        );

        Ok(S3Storage {
            client: Client::from_conf(builder.build()),
            region,
            endpoint_url: config.s3_endpoint.clone(),
        })
    }

    fn create_bucket_configuration(&self) -> Option<CreateBucketConfiguration> {
        // Custom endpoints (MinIO) and us-east-1 reject or ignore a location constraint.
        if self.endpoint_url.is_some() || self.region == DEFAULT_REGION {
            return None;
        }
        Some(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build(),
        )
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                    || e.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if !missing {
                    return Err(StorageError::BackendError(format!(
                        "head_bucket {}: {}",
                        bucket,
                        DisplayErrorContext(&e)
                    )));
                }
            }
        }

        let result = self
            .client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(self.create_bucket_configuration())
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::info!(bucket = %bucket, "S3 bucket created");
                Ok(())
            }
            // Another worker created it between our head and create.
            Err(e)
                if e.as_service_error()
                    .map(|se| se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists())
                    .unwrap_or(false) =>
            {
                Ok(())
            }
            Err(e) => Err(StorageError::BackendError(format!(
                "create_bucket {}: {}",
                bucket,
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<u64> {
        let size = tokio::fs::metadata(path).await?.len();
        let body = ByteStream::from_path(path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let start = std::time::Instant::now();

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %DisplayErrorContext(&e),
                    bucket = %bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                StorageError::UploadFailed(DisplayErrorContext(&e).to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(size)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
