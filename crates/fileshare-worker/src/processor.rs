//! Broker-independent handling of one delivery.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fileshare_core::{FileProcessedEvent, FileUploadedEvent, ProcessingContext};
use fileshare_processing::Pipeline;
use fileshare_storage::sanitize_file_name;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::publisher::OutcomePublisher;
use crate::redelivery::{Disposition, RedeliveryPolicy};

/// Decodes a payload, runs the pipeline on a private working copy of the
/// staged file and decides what happens to the delivery.
pub struct MessageProcessor {
    pipeline: Arc<Pipeline>,
    publisher: Arc<dyn OutcomePublisher>,
    policy: RedeliveryPolicy,
    work_dir: PathBuf,
}

enum Staged {
    /// Private copy inside the work directory.
    Copy { dir: PathBuf, path: PathBuf },
    /// The staged file does not exist; the pipeline reports it.
    Missing(PathBuf),
}

impl Staged {
    fn path(&self) -> &Path {
        match self {
            Staged::Copy { path, .. } => path,
            Staged::Missing(path) => path,
        }
    }
}

impl MessageProcessor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        publisher: Arc<dyn OutcomePublisher>,
        policy: RedeliveryPolicy,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pipeline,
            publisher,
            policy,
            work_dir: work_dir.into(),
        }
    }

    /// Handle one delivery that already carried `retry_count` retries.
    pub async fn process(
        &self,
        payload: &[u8],
        retry_count: u32,
        cancel: &CancellationToken,
    ) -> Disposition {
        let event = match FileUploadedEvent::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    payload_len = payload.len(),
                    "Dropping undecodable message"
                );
                return Disposition::Drop;
            }
        };

        let span = tracing::info_span!(
            "process_message",
            file_id = %event.file_id,
            correlation_id = %event.correlation_id,
            retry_count = retry_count,
        );
        self.process_event(event, retry_count, cancel)
            .instrument(span)
            .await
    }

    async fn process_event(
        &self,
        event: FileUploadedEvent,
        retry_count: u32,
        cancel: &CancellationToken,
    ) -> Disposition {
        tracing::info!(file_name = %event.file_name, size = event.file_size, "Processing uploaded file");

        let staged = match self.stage_input(&event).await {
            Ok(staged) => staged,
            Err(e) => {
                tracing::error!(error = %e, "Failed to prepare working copy");
                return self.policy.on_transient(retry_count, format!("Working copy failed: {}", e));
            }
        };

        let ctx = ProcessingContext::from_event(&event, staged.path());
        let pipeline = self.pipeline.clone();
        let token = cancel.clone();
        let run = tokio::spawn(async move { pipeline.execute(ctx, &token).await }).await;

        if let Staged::Copy { dir, .. } = &staged {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to remove working directory");
                }
            }
        }

        let ctx = match run {
            Ok(ctx) => ctx,
            Err(e) => {
                let reason = if e.is_panic() {
                    "Pipeline panicked".to_string()
                } else {
                    format!("Pipeline task failed: {}", e)
                };
                let disposition = self.policy.on_transient(retry_count, reason);
                tracing::error!(error = %e, disposition = ?disposition, "Pipeline did not finish");
                return disposition;
            }
        };

        if ctx.interrupted {
            tracing::warn!("Pipeline interrupted; message will be requeued");
            return Disposition::Requeue;
        }

        let outcome = FileProcessedEvent::from_context(&ctx);
        if let Err(e) = self.publisher.publish(&outcome).await {
            tracing::error!(error = %e, "Failed to publish outcome event");
        }

        tracing::info!(status = %outcome.status, "Message processed");
        Disposition::Ack
    }

    /// Copy the staged upload into `WORK_DIR/<file_id>-<delivery>/` so the
    /// cleanup stage never removes the only copy of the input. The directory
    /// is removed once the run ends.
    async fn stage_input(&self, event: &FileUploadedEvent) -> std::io::Result<Staged> {
        let source = PathBuf::from(&event.storage_path);
        let dir = self
            .work_dir
            .join(format!("{}-{}", event.file_id, Uuid::new_v4()));
        let path = dir.join(sanitize_file_name(&event.file_name));

        tokio::fs::create_dir_all(&dir).await?;
        match tokio::fs::copy(&source, &path).await {
            Ok(bytes) => {
                tracing::debug!(source = %source.display(), bytes = bytes, "Working copy created");
                Ok(Staged::Copy { dir, path })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                Ok(Staged::Missing(source))
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                Err(e)
            }
        }
    }
}
