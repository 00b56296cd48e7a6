//! Drives [`MessageProcessor`] with real pipeline stages, local object
//! storage, the in-memory metadata repository and a recording publisher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fileshare_core::{
    sha256_bytes, EncryptionConfig, FileProcessingStatus, HybridEncryptionService,
    ProcessingContext,
};
use fileshare_db::{InMemoryMetadataRepository, MetadataRepository};
use fileshare_processing::{default_pipeline, Filter, Pipeline, PipelineBuilder, PipelineServices, StageResult};
use fileshare_storage::LocalStorage;
use fileshare_worker::{Disposition, MessageProcessor, RecordingPublisher, RedeliveryPolicy};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Worker {
    dir: TempDir,
    repository: InMemoryMetadataRepository,
    publisher: RecordingPublisher,
    processor: MessageProcessor,
}

impl Worker {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path().join("objects")).await.unwrap());
        let repository = InMemoryMetadataRepository::new();
        let encryption = HybridEncryptionService::from_config(&EncryptionConfig {
            public_key_path: dir.path().join("keys/public.pem"),
            private_key_path: dir.path().join("keys/private.pem"),
            rsa_bits: 2048,
            auto_generate: true,
        });
        let pipeline = default_pipeline(PipelineServices {
            encryption,
            storage,
            repository: Arc::new(repository.clone()),
            original_bucket: "original-files".to_string(),
            encrypted_bucket: "encrypted-files".to_string(),
        })
        .unwrap();

        Self::with_pipeline(dir, repository, pipeline)
    }

    fn with_pipeline(
        dir: TempDir,
        repository: InMemoryMetadataRepository,
        pipeline: Pipeline,
    ) -> Self {
        let publisher = RecordingPublisher::new();
        let processor = MessageProcessor::new(
            Arc::new(pipeline),
            Arc::new(publisher.clone()),
            RedeliveryPolicy::new(3),
            dir.path().join("work"),
        );
        Self {
            dir,
            repository,
            publisher,
            processor,
        }
    }

    async fn stage(&self, name: &str, content: &[u8]) -> PathBuf {
        let staging = self.dir.path().join("staging");
        tokio::fs::create_dir_all(&staging).await.unwrap();
        let path = staging.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }
}

fn payload(file_id: Uuid, user_id: Uuid, name: &str, size: usize, path: &Path) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "fileId": file_id,
        "correlationId": Uuid::new_v4(),
        "userId": user_id,
        "userEmail": "someone@example.com",
        "fileName": name,
        "contentType": "text/plain",
        "fileSize": size,
        "uploadedAt": "2024-05-17T08:30:00Z",
        "status": "Uploaded",
        "storagePath": path.to_string_lossy(),
    }))
    .unwrap()
}

async fn work_entries(worker: &Worker) -> usize {
    let mut entries = tokio::fs::read_dir(worker.dir.path().join("work")).await.unwrap();
    let mut count = 0;
    while entries.next_entry().await.unwrap().is_some() {
        count += 1;
    }
    count
}

fn text(len: usize) -> Vec<u8> {
    b"lorem ipsum dolor sit amet\n"
        .iter()
        .cycle()
        .take(len)
        .copied()
        .collect()
}

#[tokio::test]
async fn test_text_file_end_to_end_and_redelivery() {
    let worker = Worker::new().await;
    let content = text(10 * 1024);
    let staged = worker.stage("notes.txt", &content).await;
    let file_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let message = payload(file_id, user_id, "notes.txt", content.len(), &staged);
    let cancel = CancellationToken::new();

    let disposition = worker.processor.process(&message, 0, &cancel).await;
    assert_eq!(disposition, Disposition::Ack);

    assert!(worker.dir.path().join("keys/public.pem").exists());
    assert!(worker.dir.path().join("keys/private.pem").exists());

    let digest = sha256_bytes(&content);
    let doc = worker.repository.get_by_file_id(file_id).await.unwrap().unwrap();
    assert_eq!(doc.status, FileProcessingStatus::Completed);
    assert_eq!(doc.hash.as_deref(), Some(digest.as_str()));
    assert_eq!(doc.custom_metadata["fileCategory"], "text");
    assert!(doc.is_encrypted);
    assert!(doc.is_decryption_validated);

    let key = format!("{}/2024/05/17/{}/notes.txt", user_id, file_id);
    assert_eq!(doc.original_object_key.as_deref(), Some(key.as_str()));
    let encrypted_key = format!("{}.encrypted", key);
    assert_eq!(doc.object_key.as_deref(), Some(encrypted_key.as_str()));
    let objects = worker.dir.path().join("objects");
    let original = tokio::fs::read(objects.join("original-files").join(&key))
        .await
        .unwrap();
    assert_eq!(original, content);
    assert!(objects.join("encrypted-files").join(&encrypted_key).is_file());

    // Working copies are gone; the staged upload is untouched.
    assert_eq!(work_entries(&worker).await, 0);
    assert!(staged.exists());

    let events = worker.publisher.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, FileProcessingStatus::Completed);
    assert_eq!(events[0].hash.as_deref(), Some(digest.as_str()));
    assert_eq!(events[0].object_key.as_deref(), Some(encrypted_key.as_str()));

    let disposition = worker.processor.process(&message, 0, &cancel).await;
    assert_eq!(disposition, Disposition::Ack);

    let events = worker.publisher.events().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].status, FileProcessingStatus::Completed);
    assert_eq!(events[1].hash.as_deref(), Some(digest.as_str()));
    assert_eq!(worker.repository.len().await, 1);
}

#[tokio::test]
async fn test_work_dir_is_empty_after_many_files() {
    let worker = Worker::new().await;
    let cancel = CancellationToken::new();

    for i in 0..5 {
        let name = format!("doc-{}.txt", i);
        let content = text(512 + i);
        let staged = worker.stage(&name, &content).await;
        let message = payload(Uuid::new_v4(), Uuid::new_v4(), &name, content.len(), &staged);
        assert_eq!(worker.processor.process(&message, 0, &cancel).await, Disposition::Ack);
    }

    assert_eq!(worker.publisher.events().await.len(), 5);
    assert_eq!(work_entries(&worker).await, 0);
}

#[tokio::test]
async fn test_missing_staged_file_is_acked_as_failed() {
    let worker = Worker::new().await;
    let missing = worker.dir.path().join("staging").join("gone.pdf");
    let file_id = Uuid::new_v4();
    let message = payload(file_id, Uuid::new_v4(), "gone.pdf", 10, &missing);

    let disposition = worker
        .processor
        .process(&message, 0, &CancellationToken::new())
        .await;

    assert_eq!(disposition, Disposition::Ack);
    let events = worker.publisher.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, FileProcessingStatus::Failed);
    assert_eq!(
        events[0].error_message,
        Some(format!("File not found: {}", missing.display()))
    );
    let doc = worker.repository.get_by_file_id(file_id).await.unwrap().unwrap();
    assert_eq!(doc.status, FileProcessingStatus::Failed);
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let worker = Worker::new().await;

    let disposition = worker
        .processor
        .process(b"{not json", 0, &CancellationToken::new())
        .await;

    assert_eq!(disposition, Disposition::Drop);
    assert!(worker.publisher.events().await.is_empty());
    assert!(worker.repository.is_empty().await);
}

#[tokio::test]
async fn test_shutdown_requeues_without_outcome() {
    let worker = Worker::new().await;
    let staged = worker.stage("a.md", b"# a").await;
    let message = payload(Uuid::new_v4(), Uuid::new_v4(), "a.md", 3, &staged);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let disposition = worker.processor.process(&message, 0, &cancel).await;

    assert_eq!(disposition, Disposition::Requeue);
    assert!(worker.publisher.events().await.is_empty());
    assert!(worker.repository.is_empty().await);
    assert!(staged.exists());
}

struct PanickingFilter;

#[async_trait]
impl Filter for PanickingFilter {
    fn name(&self) -> &'static str {
        "Panicking"
    }

    fn order(&self) -> u32 {
        10
    }

    async fn process(&self, _ctx: ProcessingContext, _cancel: &CancellationToken) -> StageResult {
        panic!("stage blew up");
    }
}

#[tokio::test]
async fn test_panicking_pipeline_retries_then_dead_letters() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = PipelineBuilder::new().filter(PanickingFilter).build().unwrap();
    let worker = Worker::with_pipeline(dir, InMemoryMetadataRepository::new(), pipeline);
    let staged = worker.stage("a.txt", b"abc").await;
    let message = payload(Uuid::new_v4(), Uuid::new_v4(), "a.txt", 3, &staged);
    let cancel = CancellationToken::new();

    assert_eq!(
        worker.processor.process(&message, 0, &cancel).await,
        Disposition::Retry { attempt: 1 }
    );
    assert_eq!(
        worker.processor.process(&message, 1, &cancel).await,
        Disposition::Retry { attempt: 2 }
    );
    assert_eq!(
        worker.processor.process(&message, 2, &cancel).await,
        Disposition::DeadLetter {
            reason: "Pipeline panicked".to_string()
        }
    );
    assert!(worker.publisher.events().await.is_empty());
    assert!(staged.exists());
}
