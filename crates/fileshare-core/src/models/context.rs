//! Per-message unit of work threaded through the processing pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::hashing::HASH_ALGORITHM;
use crate::models::events::FileUploadedEvent;
use crate::models::metadata::FileProcessingStatus;

/// State of one file moving through the pipeline.
///
/// Every stage receives the context by value and hands it back, so a run
/// has exactly one owner at any time. The audit fields (`errors`,
/// `processed_filters`, `completed_at`) are only reachable through methods
/// that keep them append-only.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub correlation_id: Uuid,
    pub user_email: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub declared_size: u64,
    pub description: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,

    /// Local copy of the received bytes.
    pub local_path: PathBuf,

    pub hash: Option<String>,
    pub hash_algorithm: String,
    pub metadata: Map<String, Value>,

    pub encrypted_path: Option<PathBuf>,
    pub is_encrypted: bool,
    pub is_decryption_validated: bool,

    pub original_bucket: Option<String>,
    pub original_object_key: Option<String>,
    pub encrypted_bucket: Option<String>,
    pub encrypted_object_key: Option<String>,

    /// Set by the cleanup stage once local artifacts are gone.
    pub is_completed: bool,
    /// Set when a shutdown request stopped the run before all stages ran.
    pub interrupted: bool,

    errors: Vec<String>,
    processed_filters: Vec<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl ProcessingContext {
    pub fn new(
        file_id: Uuid,
        user_id: Uuid,
        file_name: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            file_id,
            user_id,
            correlation_id: Uuid::new_v4(),
            user_email: None,
            file_name: file_name.into(),
            content_type: "application/octet-stream".to_string(),
            declared_size: 0,
            description: None,
            uploaded_at: None,
            local_path: local_path.into(),
            hash: None,
            hash_algorithm: HASH_ALGORITHM.to_string(),
            metadata: Map::new(),
            encrypted_path: None,
            is_encrypted: false,
            is_decryption_validated: false,
            original_bucket: None,
            original_object_key: None,
            encrypted_bucket: None,
            encrypted_object_key: None,
            is_completed: false,
            interrupted: false,
            errors: Vec::new(),
            processed_filters: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Build the initial context for an inbound upload notification.
    pub fn from_event(event: &FileUploadedEvent, local_path: impl Into<PathBuf>) -> Self {
        let mut ctx = Self::new(event.file_id, event.user_id, &event.file_name, local_path);
        ctx.correlation_id = event.correlation_id;
        ctx.user_email = event.user_email.clone().filter(|e| !e.is_empty());
        ctx.content_type = if event.content_type.is_empty() {
            "application/octet-stream".to_string()
        } else {
            event.content_type.clone()
        };
        ctx.declared_size = event.file_size;
        ctx.description = event.description.clone();
        ctx.uploaded_at = event.uploaded_at;
        ctx
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn processed_filters(&self) -> &[String] {
        &self.processed_filters
    }

    pub fn record_processed(&mut self, filter_name: impl Into<String>) {
        self.processed_filters.push(filter_name.into());
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Stamp the completion time. Later calls leave the first stamp intact.
    pub fn complete(&mut self) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Terminal status derived from the accumulated errors.
    pub fn status(&self) -> FileProcessingStatus {
        if self.has_errors() {
            FileProcessingStatus::Failed
        } else {
            FileProcessingStatus::Completed
        }
    }

    /// All errors joined with `"; "`, or `None` for a clean run.
    pub fn error_summary(&self) -> Option<String> {
        if self.has_errors() {
            Some(self.errors.join("; "))
        } else {
            None
        }
    }

    /// Timestamp used for the date partition of object keys. Taken from the
    /// upload event so that redelivery on another day targets the same keys.
    pub fn partition_time(&self) -> DateTime<Utc> {
        self.uploaded_at.unwrap_or(self.started_at)
    }

    /// The key downstream consumers should reference: the ciphertext copy
    /// when one was stored, otherwise the original.
    pub fn primary_object_key(&self) -> Option<&str> {
        self.encrypted_object_key
            .as_deref()
            .or(self.original_object_key.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProcessingContext {
        ProcessingContext::new(Uuid::new_v4(), Uuid::new_v4(), "doc.pdf", "/tmp/doc.pdf")
    }

    #[test]
    fn test_has_errors_is_derived() {
        let mut ctx = ctx();
        assert!(!ctx.has_errors());
        assert_eq!(ctx.status(), FileProcessingStatus::Completed);
        assert!(ctx.error_summary().is_none());

        ctx.add_error("first");
        ctx.add_error("second");
        assert!(ctx.has_errors());
        assert_eq!(ctx.status(), FileProcessingStatus::Failed);
        assert_eq!(ctx.error_summary().as_deref(), Some("first; second"));
    }

    #[test]
    fn test_complete_stamps_once() {
        let mut ctx = ctx();
        assert!(ctx.completed_at().is_none());
        assert!(ctx.complete());
        let first = ctx.completed_at();
        assert!(!ctx.complete());
        assert_eq!(ctx.completed_at(), first);
        assert!(first.unwrap() >= ctx.started_at());
    }

    #[test]
    fn test_primary_object_key_prefers_ciphertext() {
        let mut ctx = ctx();
        assert!(ctx.primary_object_key().is_none());
        ctx.original_object_key = Some("u/2024/01/01/f/doc.pdf".to_string());
        assert_eq!(ctx.primary_object_key(), Some("u/2024/01/01/f/doc.pdf"));
        ctx.encrypted_object_key = Some("u/2024/01/01/f/doc.pdf.encrypted".to_string());
        assert_eq!(
            ctx.primary_object_key(),
            Some("u/2024/01/01/f/doc.pdf.encrypted")
        );
    }

    #[test]
    fn test_partition_time_uses_upload_timestamp() {
        let mut ctx = ctx();
        assert_eq!(ctx.partition_time(), ctx.started_at());
        let uploaded = "2024-03-05T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        ctx.uploaded_at = Some(uploaded);
        assert_eq!(ctx.partition_time(), uploaded);
    }
}
