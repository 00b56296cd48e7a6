use async_trait::async_trait;
use fileshare_core::{sha256_file, CryptoError, HybridEncryptionService, ProcessingContext};
use tokio_util::sync::CancellationToken;

use super::{order, remove_if_exists, with_suffix};
use crate::filter::{Filter, StageFault, StageResult};

/// Decrypts the ciphertext into a scratch file and checks that it hashes to
/// the original digest.
pub struct DecryptValidationFilter {
    encryption: HybridEncryptionService,
}

impl DecryptValidationFilter {
    pub fn new(encryption: HybridEncryptionService) -> Self {
        Self { encryption }
    }
}

enum Validation {
    Matched(String),
    Mismatched(String),
}

impl DecryptValidationFilter {
    async fn validate(
        &self,
        ctx: &ProcessingContext,
        scratch: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<Validation, CryptoError> {
        let encrypted = ctx
            .encrypted_path
            .as_deref()
            .ok_or_else(|| CryptoError::MalformedContainer("no ciphertext recorded".to_string()))?;

        self.encryption.decrypt_file(encrypted, scratch, cancel).await?;
        let decrypted = sha256_file(scratch, cancel).await?;

        if ctx.hash.as_deref() == Some(decrypted.as_str()) {
            Ok(Validation::Matched(decrypted))
        } else {
            Ok(Validation::Mismatched(decrypted))
        }
    }
}

#[async_trait]
impl Filter for DecryptValidationFilter {
    fn name(&self) -> &'static str {
        "DecryptValidation"
    }

    fn order(&self) -> u32 {
        order::DECRYPT_VALIDATE
    }

    async fn process(&self, mut ctx: ProcessingContext, cancel: &CancellationToken) -> StageResult {
        if !ctx.is_encrypted {
            tracing::info!(file_id = %ctx.file_id, "File not encrypted, skipping decryption validation");
            return Ok(ctx);
        }

        let scratch = with_suffix(&ctx.local_path, ".decrypted");
        let result = self.validate(&ctx, &scratch, cancel).await;

        if let Err(e) = remove_if_exists(&scratch).await {
            tracing::warn!(path = %scratch.display(), error = %e, "Failed to remove decrypted scratch file");
        }

        match result {
            Ok(Validation::Matched(digest)) => {
                tracing::info!(file_id = %ctx.file_id, "Decryption validated");
                ctx.is_decryption_validated = true;
                ctx.insert_metadata("decryptionValidated", true);
                ctx.insert_metadata("decryptedHash", digest);
            }
            Ok(Validation::Mismatched(digest)) => {
                let original = ctx.hash.clone().unwrap_or_default();
                tracing::error!(
                    file_id = %ctx.file_id,
                    original = %original,
                    decrypted = %digest,
                    "Decrypted content does not match original"
                );
                ctx.add_error(format!(
                    "Decryption validation failed: Hash mismatch. Original: {}, Decrypted: {}",
                    original, digest
                ));
            }
            Err(CryptoError::Cancelled) => return Err(StageFault::cancelled(ctx)),
            Err(e) => {
                tracing::error!(file_id = %ctx.file_id, error = %e, "Decryption validation failed");
                ctx.add_error(format!("Decryption validation failed: {}", e));
            }
        }

        Ok(ctx)
    }
}
