use std::sync::Arc;

use async_trait::async_trait;
use fileshare_core::{FileMetadataDocument, ProcessingContext};
use fileshare_db::{MetadataRepository, UpsertOutcome};
use tokio_util::sync::CancellationToken;

use super::order;
use crate::filter::{Filter, FilterPhase, StageResult};

/// Upserts the metadata document for the run, successful or not.
pub struct MetadataPersistenceFilter {
    repository: Arc<dyn MetadataRepository>,
}

impl MetadataPersistenceFilter {
    pub fn new(repository: Arc<dyn MetadataRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Filter for MetadataPersistenceFilter {
    fn name(&self) -> &'static str {
        "MetadataPersistence"
    }

    fn order(&self) -> u32 {
        order::PERSIST
    }

    fn phase(&self) -> FilterPhase {
        FilterPhase::Finalizer
    }

    async fn process(&self, mut ctx: ProcessingContext, _cancel: &CancellationToken) -> StageResult {
        let document = FileMetadataDocument::from_context(&ctx);

        match self.repository.get_by_file_id(ctx.file_id).await {
            Ok(Some(previous)) => {
                tracing::info!(
                    file_id = %ctx.file_id,
                    previous_status = %previous.status,
                    status = %document.status,
                    "Record already exists for file"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(file_id = %ctx.file_id, error = %e, "Prior record lookup failed");
            }
        }

        match self.repository.upsert(&document).await {
            Ok(UpsertOutcome::Written) => {
                tracing::info!(
                    file_id = %ctx.file_id,
                    status = %document.status,
                    "File metadata persisted"
                );
            }
            Ok(UpsertOutcome::KeptCompleted) => {
                tracing::info!(
                    file_id = %ctx.file_id,
                    status = %document.status,
                    "Completed record already stored; left unchanged"
                );
            }
            Err(e) => {
                tracing::error!(file_id = %ctx.file_id, error = %e, "Metadata persistence failed");
                ctx.add_error(format!("Metadata persistence failed: {}", e));
            }
        }

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileshare_core::FileProcessingStatus;
    use fileshare_db::{InMemoryMetadataRepository, RepositoryResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingRepository {
        inner: InMemoryMetadataRepository,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl MetadataRepository for CountingRepository {
        async fn upsert(&self, doc: &FileMetadataDocument) -> RepositoryResult<UpsertOutcome> {
            self.inner.upsert(doc).await
        }

        async fn get_by_file_id(&self, file_id: Uuid) -> RepositoryResult<Option<FileMetadataDocument>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.get_by_file_id(file_id).await
        }
    }

    #[tokio::test]
    async fn test_redelivered_failure_keeps_completed_record() {
        let repository = Arc::new(CountingRepository::default());
        let filter = MetadataPersistenceFilter::new(repository.clone());
        let file_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let ctx = ProcessingContext::new(file_id, user_id, "a.txt", "/tmp/a.txt");
        let ctx = filter.process(ctx, &cancel).await.unwrap();
        assert!(!ctx.has_errors());

        let mut ctx = ProcessingContext::new(file_id, user_id, "a.txt", "/tmp/a.txt");
        ctx.add_error("File not found: /tmp/a.txt");
        let ctx = filter.process(ctx, &cancel).await.unwrap();
        assert_eq!(ctx.errors(), ["File not found: /tmp/a.txt"]);

        assert_eq!(repository.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(repository.inner.write_count().await, 1);
        let stored = repository.inner.get_by_file_id(file_id).await.unwrap().unwrap();
        assert_eq!(stored.status, FileProcessingStatus::Completed);
    }
}
