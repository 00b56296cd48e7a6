use async_trait::async_trait;
use fileshare_core::{FileMetadataDocument, FileProcessingStatus};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written,
    /// A `Completed` record already exists and the incoming one is not
    /// `Completed`; the stored record was left untouched.
    KeptCompleted,
}

/// Whether an incoming document may replace the stored one.
///
/// A successful outcome is never downgraded by a later failed redelivery.
pub fn may_replace(existing: FileProcessingStatus, incoming: FileProcessingStatus) -> bool {
    existing != FileProcessingStatus::Completed || incoming == FileProcessingStatus::Completed
}

#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Insert or replace the record for `doc.file_id`.
    async fn upsert(&self, doc: &FileMetadataDocument) -> RepositoryResult<UpsertOutcome>;

    async fn get_by_file_id(&self, file_id: Uuid) -> RepositoryResult<Option<FileMetadataDocument>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use FileProcessingStatus::*;

    #[test]
    fn completed_is_never_downgraded() {
        assert!(may_replace(Failed, Completed));
        assert!(may_replace(Failed, Failed));
        assert!(may_replace(Pending, Failed));
        assert!(may_replace(Completed, Completed));
        assert!(!may_replace(Completed, Failed));
    }
}
