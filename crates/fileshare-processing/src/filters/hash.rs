use std::io::ErrorKind;
use std::time::Instant;

use async_trait::async_trait;
use fileshare_core::{sha256_file, CryptoError, ProcessingContext, HASH_ALGORITHM};
use tokio_util::sync::CancellationToken;

use super::order;
use crate::filter::{Filter, StageFault, StageResult};

/// Computes the SHA-256 digest of the local file.
#[derive(Debug, Default)]
pub struct HashFilter;

impl HashFilter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Filter for HashFilter {
    fn name(&self) -> &'static str {
        "Hash"
    }

    fn order(&self) -> u32 {
        order::HASH
    }

    async fn process(&self, mut ctx: ProcessingContext, cancel: &CancellationToken) -> StageResult {
        let start = Instant::now();

        match sha256_file(&ctx.local_path, cancel).await {
            Ok(digest) => {
                tracing::info!(
                    file_id = %ctx.file_id,
                    hash = %digest,
                    duration_ms = %(start.elapsed().as_secs_f64() * 1000.0),
                    "File hash computed"
                );
                ctx.hash = Some(digest);
                ctx.hash_algorithm = HASH_ALGORITHM.to_string();
            }
            Err(CryptoError::Cancelled) => return Err(StageFault::cancelled(ctx)),
            Err(CryptoError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                let message = format!("File not found: {}", ctx.local_path.display());
                tracing::error!(file_id = %ctx.file_id, "{}", message);
                ctx.add_error(message);
            }
            Err(e) => {
                tracing::error!(file_id = %ctx.file_id, error = %e, "Hash computation failed");
                ctx.add_error(format!("Hash computation failed: {}", e));
            }
        }

        Ok(ctx)
    }
}
