//! Error types module
//!
//! Cryptographic failures get their own enum so the encryption filters can
//! tell an authentication failure (wrong key, tampered ciphertext) apart from
//! plain I/O trouble. Everything above the filter boundary is carried as
//! `anyhow::Error`.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Key material error: {0}")]
    KeyMaterial(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key wrapping failed: {0}")]
    KeyWrap(String),

    #[error("Key unwrapping failed: {0}")]
    KeyUnwrap(String),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// AEAD tag verification failed for a segment. Raised for a wrong key,
    /// a tampered body and a truncated stream alike.
    #[error("Authentication failed for segment {segment}")]
    Authentication { segment: u64 },

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let err: CryptoError = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, CryptoError::Io(_)));
        assert_eq!(err.to_string(), "IO error: missing");
    }
}
