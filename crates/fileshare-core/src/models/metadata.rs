use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::context::ProcessingContext;

/// Lifecycle of a file record in the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "file_processing_status", rename_all = "PascalCase")
)]
pub enum FileProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileProcessingStatus::Pending => "Pending",
            FileProcessingStatus::Processing => "Processing",
            FileProcessingStatus::Completed => "Completed",
            FileProcessingStatus::Failed => "Failed",
        }
    }
}

impl FromStr for FileProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(FileProcessingStatus::Pending),
            "processing" => Ok(FileProcessingStatus::Processing),
            "completed" => Ok(FileProcessingStatus::Completed),
            "failed" => Ok(FileProcessingStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid processing status: {}", s)),
        }
    }
}

impl Display for FileProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Durable record of a processed file, keyed by `file_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataDocument {
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub original_file_name: String,
    pub stored_file_name: String,
    pub content_type: String,
    pub file_size: i64,
    pub hash: Option<String>,
    pub hash_algorithm: String,
    pub object_key: Option<String>,
    pub original_object_key: Option<String>,
    pub bucket: Option<String>,
    pub original_bucket: Option<String>,
    pub is_encrypted: bool,
    pub is_decryption_validated: bool,
    pub description: Option<String>,
    pub status: FileProcessingStatus,
    pub error_message: Option<String>,
    pub custom_metadata: Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl FileMetadataDocument {
    /// Project the current state of a run. Captures partial progress: a run
    /// that hashed but failed to upload still records its digest.
    pub fn from_context(ctx: &ProcessingContext) -> Self {
        let (object_key, bucket) = match ctx.encrypted_object_key.as_ref() {
            Some(key) => (Some(key.clone()), ctx.encrypted_bucket.clone()),
            None => (ctx.original_object_key.clone(), ctx.original_bucket.clone()),
        };
        let stored_file_name = object_key
            .as_deref()
            .and_then(|key| key.rsplit('/').next())
            .unwrap_or(&ctx.file_name)
            .to_string();

        Self {
            file_id: ctx.file_id,
            user_id: ctx.user_id,
            original_file_name: ctx.file_name.clone(),
            stored_file_name,
            content_type: ctx.content_type.clone(),
            file_size: i64::try_from(ctx.declared_size).unwrap_or(i64::MAX),
            hash: ctx.hash.clone(),
            hash_algorithm: ctx.hash_algorithm.clone(),
            object_key,
            original_object_key: ctx.original_object_key.clone(),
            bucket,
            original_bucket: ctx.original_bucket.clone(),
            is_encrypted: ctx.is_encrypted,
            is_decryption_validated: ctx.is_decryption_validated,
            description: ctx.description.clone(),
            status: ctx.status(),
            error_message: ctx.error_summary(),
            custom_metadata: Value::Object(ctx.metadata.clone()),
            created_at: ctx.uploaded_at.unwrap_or_else(|| ctx.started_at()),
            processed_at: Some(Utc::now()),
        }
    }
}
