//! Streaming content digests

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::{CryptoError, CryptoResult};

/// Algorithm tag recorded next to every digest.
pub const HASH_ALGORITHM: &str = "SHA256";

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hash a file with SHA-256 without loading it into memory.
///
/// Returns the lowercase hex digest. The token is checked between buffer
/// reads so a shutdown request stops hashing of very large files.
pub async fn sha256_file(path: &Path, cancel: &CancellationToken) -> CryptoResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        if cancel.is_cancelled() {
            return Err(CryptoError::Cancelled);
        }
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash an in-memory buffer with SHA-256.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[tokio::test]
    async fn test_empty_file_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        tokio::fs::write(&path, b"").await.unwrap();

        let digest = sha256_file(&path, &CancellationToken::new()).await.unwrap();
        assert_eq!(digest, EMPTY_SHA256);
    }

    #[tokio::test]
    async fn test_same_content_same_digest() {
        let dir = tempdir().unwrap();
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        tokio::fs::write(&a, &content).await.unwrap();
        tokio::fs::write(&b, &content).await.unwrap();

        let token = CancellationToken::new();
        let digest_a = sha256_file(&a, &token).await.unwrap();
        let digest_b = sha256_file(&b, &token).await.unwrap();

        assert_eq!(digest_a, digest_b);
        assert_eq!(digest_a, sha256_bytes(&content));
        assert_eq!(digest_a.len(), 64);
        assert!(digest_a
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[tokio::test]
    async fn test_different_content_different_digest() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        tokio::fs::write(&a, b"hello").await.unwrap();
        tokio::fs::write(&b, b"hello!").await.unwrap();

        let token = CancellationToken::new();
        assert_ne!(
            sha256_file(&a, &token).await.unwrap(),
            sha256_file(&b, &token).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = sha256_file(&dir.path().join("nope"), &CancellationToken::new()).await;
        assert!(matches!(result, Err(CryptoError::Io(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = sha256_file(&path, &token).await;
        assert!(matches!(result, Err(CryptoError::Cancelled)));
    }
}
