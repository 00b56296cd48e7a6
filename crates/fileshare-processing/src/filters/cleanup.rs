use std::path::Path;

use async_trait::async_trait;
use fileshare_core::ProcessingContext;
use tokio_util::sync::CancellationToken;

use super::{order, remove_if_exists};
use crate::filter::{Filter, FilterPhase, StageResult};

/// Removes the local plaintext and ciphertext files. Never records errors.
#[derive(Debug, Default)]
pub struct CleanupFilter;

impl CleanupFilter {
    pub fn new() -> Self {
        Self
    }
}

async fn remove(file_id: uuid::Uuid, path: &Path) {
    match remove_if_exists(path).await {
        Ok(true) => tracing::debug!(file_id = %file_id, path = %path.display(), "Deleted local file"),
        Ok(false) => {}
        Err(e) => tracing::warn!(
            file_id = %file_id,
            path = %path.display(),
            error = %e,
            "Failed to delete local file"
        ),
    }
}

#[async_trait]
impl Filter for CleanupFilter {
    fn name(&self) -> &'static str {
        "Cleanup"
    }

    fn order(&self) -> u32 {
        order::CLEANUP
    }

    fn phase(&self) -> FilterPhase {
        FilterPhase::Finalizer
    }

    async fn process(&self, mut ctx: ProcessingContext, _cancel: &CancellationToken) -> StageResult {
        remove(ctx.file_id, &ctx.local_path).await;
        if let Some(encrypted) = &ctx.encrypted_path {
            remove(ctx.file_id, encrypted).await;
        }

        ctx.is_completed = true;
        tracing::info!(file_id = %ctx.file_id, "Cleanup completed");
        Ok(ctx)
    }
}
