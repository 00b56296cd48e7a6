//! Queue payloads: the inbound upload notification and the outbound outcome.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::context::ProcessingContext;
use crate::models::metadata::FileProcessingStatus;

/// AMQP `type` property stamped on every outcome message.
pub const FILE_PROCESSED_EVENT_TYPE: &str = "FileProcessedEvent";

/// Notification published by the ingestion service once a file is staged.
///
/// Field names are camelCase on the wire; PascalCase spellings are accepted
/// as well because some producers serialize with their default naming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadedEvent {
    #[serde(alias = "FileId")]
    pub file_id: Uuid,
    #[serde(alias = "CorrelationId")]
    pub correlation_id: Uuid,
    #[serde(alias = "UserId")]
    pub user_id: Uuid,
    #[serde(default, alias = "UserEmail")]
    pub user_email: Option<String>,
    #[serde(alias = "FileName")]
    pub file_name: String,
    #[serde(default, alias = "ContentType")]
    pub content_type: String,
    #[serde(default, alias = "FileSize")]
    pub file_size: u64,
    #[serde(
        default,
        alias = "UploadedAt",
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "Status")]
    pub status: Option<String>,
    #[serde(alias = "StoragePath")]
    pub storage_path: String,
    #[serde(default, alias = "Description")]
    pub description: Option<String>,
}

impl FileUploadedEvent {
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Accepts RFC 3339 timestamps and offset-less ones (read as UTC).
fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}

/// Terminal outcome of one pipeline run, consumed by the status notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessedEvent {
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub correlation_id: Uuid,
    pub status: FileProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl FileProcessedEvent {
    pub fn from_context(ctx: &ProcessingContext) -> Self {
        Self {
            file_id: ctx.file_id,
            user_id: ctx.user_id,
            correlation_id: ctx.correlation_id,
            status: ctx.status(),
            error_message: ctx.error_summary(),
            hash: ctx.hash.clone(),
            object_key: ctx.primary_object_key().map(str::to_string),
            processed_at: ctx.completed_at().unwrap_or_else(Utc::now),
        }
    }
}
