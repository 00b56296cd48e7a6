use std::time::Instant;

use async_trait::async_trait;
use fileshare_core::{CryptoError, HybridEncryptionService, ProcessingContext};
use tokio_util::sync::CancellationToken;

use super::{order, with_suffix};
use crate::filter::{Filter, StageFault, StageResult};

/// Writes a hybrid-encrypted copy of the local file next to it.
pub struct EncryptionFilter {
    encryption: HybridEncryptionService,
}

impl EncryptionFilter {
    pub fn new(encryption: HybridEncryptionService) -> Self {
        Self { encryption }
    }
}

#[async_trait]
impl Filter for EncryptionFilter {
    fn name(&self) -> &'static str {
        "Encryption"
    }

    fn order(&self) -> u32 {
        order::ENCRYPT
    }

    async fn process(&self, mut ctx: ProcessingContext, cancel: &CancellationToken) -> StageResult {
        let start = Instant::now();
        let output = with_suffix(&ctx.local_path, ".encrypted");

        match self.encryption.encrypt_file(&ctx.local_path, &output, cancel).await {
            Ok(size) => {
                tracing::info!(
                    file_id = %ctx.file_id,
                    encrypted_size = size,
                    duration_ms = %(start.elapsed().as_secs_f64() * 1000.0),
                    "File encrypted"
                );
                ctx.encrypted_path = Some(output);
                ctx.is_encrypted = true;
                ctx.insert_metadata("encryptedSize", size);
            }
            Err(CryptoError::Cancelled) => return Err(StageFault::cancelled(ctx)),
            Err(e) => {
                tracing::error!(file_id = %ctx.file_id, error = %e, "Encryption failed");
                ctx.is_encrypted = false;
                ctx.add_error(format!("Encryption failed: {}", e));
            }
        }

        Ok(ctx)
    }
}
