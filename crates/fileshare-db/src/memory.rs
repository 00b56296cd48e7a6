//! In-memory metadata repository
//!
//! Same upsert semantics as the PostgreSQL repository, without a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fileshare_core::FileMetadataDocument;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repository::{may_replace, MetadataRepository, RepositoryResult, UpsertOutcome};

#[derive(Clone, Default)]
pub struct InMemoryMetadataRepository {
    documents: Arc<RwLock<HashMap<Uuid, FileMetadataDocument>>>,
    writes: Arc<RwLock<usize>>,
}

impl InMemoryMetadataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Number of upserts that changed the stored state.
    pub async fn write_count(&self) -> usize {
        *self.writes.read().await
    }
}

#[async_trait]
impl MetadataRepository for InMemoryMetadataRepository {
    async fn upsert(&self, doc: &FileMetadataDocument) -> RepositoryResult<UpsertOutcome> {
        let mut documents = self.documents.write().await;

        if let Some(existing) = documents.get_mut(&doc.file_id) {
            if !may_replace(existing.status, doc.status) {
                return Ok(UpsertOutcome::KeptCompleted);
            }
            let created_at = existing.created_at;
            *existing = doc.clone();
            existing.created_at = created_at;
        } else {
            documents.insert(doc.file_id, doc.clone());
        }

        *self.writes.write().await += 1;
        Ok(UpsertOutcome::Written)
    }

    async fn get_by_file_id(&self, file_id: Uuid) -> RepositoryResult<Option<FileMetadataDocument>> {
        Ok(self.documents.read().await.get(&file_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileshare_core::{FileProcessingStatus, ProcessingContext};

    fn document(file_id: Uuid, failed: bool) -> FileMetadataDocument {
        let mut ctx = ProcessingContext::new(file_id, Uuid::new_v4(), "a.txt", "/tmp/a.txt");
        if failed {
            ctx.add_error("File not found: /tmp/a.txt");
        }
        FileMetadataDocument::from_context(&ctx)
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_file_id() {
        let repo = InMemoryMetadataRepository::new();
        let file_id = Uuid::new_v4();

        assert_eq!(
            repo.upsert(&document(file_id, true)).await.unwrap(),
            UpsertOutcome::Written
        );
        assert_eq!(
            repo.upsert(&document(file_id, false)).await.unwrap(),
            UpsertOutcome::Written
        );

        assert_eq!(repo.len().await, 1);
        let stored = repo.get_by_file_id(file_id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileProcessingStatus::Completed);
        assert_eq!(repo.write_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_redelivery_keeps_completed_record() {
        let repo = InMemoryMetadataRepository::new();
        let file_id = Uuid::new_v4();

        repo.upsert(&document(file_id, false)).await.unwrap();
        let outcome = repo.upsert(&document(file_id, true)).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::KeptCompleted);
        let stored = repo.get_by_file_id(file_id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileProcessingStatus::Completed);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_missing_record() {
        let repo = InMemoryMetadataRepository::new();
        assert!(repo.is_empty().await);
        assert!(repo.get_by_file_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
