//! Hybrid file encryption (RSA-OAEP key wrapping + AES-256-GCM STREAM)
//!
//! Container layout, integers little-endian:
//!
//! ```text
//! u32 wrapped_len | wrapped_key[wrapped_len] | segment 0 | segment 1 | ... | last segment
//! ```
//!
//! `wrapped_key` is RSA-OAEP(SHA-256) over the 32-byte AES key followed by the
//! 7-byte STREAM nonce prefix. Plaintext is cut into 64 KiB segments; every
//! full segment is sealed as a regular STREAM block and the trailing (possibly
//! empty) remainder as the final block, so truncation and reordering both fail
//! authentication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::aead::{KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::config::EncryptionConfig;
use crate::error::{CryptoError, CryptoResult};

/// Plaintext bytes per STREAM segment.
pub const SEGMENT_SIZE: usize = 64 * 1024;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const STREAM_NONCE_SIZE: usize = 7;
const LENGTH_PREFIX_SIZE: usize = 4;
/// Large enough for an 8192-bit modulus.
const MAX_WRAPPED_KEY_LEN: usize = 1024;

struct KeyPair {
    public: RsaPublicKey,
    private: RsaPrivateKey,
}

/// RSA key pair backed by PEM files, loaded once per process.
///
/// When either file is missing and auto-generation is enabled, a new pair is
/// generated and both halves are written (private key as PKCS#8, public key
/// as SPKI). Concurrent first uses share a single load.
pub struct KeyStore {
    public_key_path: PathBuf,
    private_key_path: PathBuf,
    rsa_bits: usize,
    auto_generate: bool,
    keys: OnceCell<Arc<KeyPair>>,
}

impl KeyStore {
    pub fn new(config: &EncryptionConfig) -> Self {
        Self {
            public_key_path: config.public_key_path.clone(),
            private_key_path: config.private_key_path.clone(),
            rsa_bits: config.rsa_bits,
            auto_generate: config.auto_generate,
            keys: OnceCell::new(),
        }
    }

    /// Key store with injected key material; never touches the filesystem.
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self {
            public_key_path: PathBuf::new(),
            private_key_path: PathBuf::new(),
            rsa_bits: 0,
            auto_generate: false,
            keys: OnceCell::new_with(Some(Arc::new(KeyPair { public, private }))),
        }
    }

    async fn keys(&self) -> CryptoResult<Arc<KeyPair>> {
        let keys = self
            .keys
            .get_or_try_init(|| async { self.load_or_generate().await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(keys))
    }

    async fn load_or_generate(&self) -> CryptoResult<KeyPair> {
        let public_exists = fs::try_exists(&self.public_key_path).await?;
        let private_exists = fs::try_exists(&self.private_key_path).await?;

        if public_exists && private_exists {
            return self.load().await;
        }

        if !self.auto_generate {
            let missing = if public_exists {
                &self.private_key_path
            } else {
                &self.public_key_path
            };
            return Err(CryptoError::KeyNotFound(missing.display().to_string()));
        }

        tracing::warn!(
            public_key_path = %self.public_key_path.display(),
            private_key_path = %self.private_key_path.display(),
            rsa_bits = self.rsa_bits,
            "Key pair incomplete on disk, generating a new one"
        );
        self.generate().await
    }

    async fn load(&self) -> CryptoResult<KeyPair> {
        let private_pem = fs::read_to_string(&self.private_key_path).await?;
        let public_pem = fs::read_to_string(&self.public_key_path).await?;

        let private = RsaPrivateKey::from_pkcs8_pem(&private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&private_pem))
            .map_err(|e| CryptoError::KeyMaterial(format!("Invalid private key: {}", e)))?;
        let public = RsaPublicKey::from_public_key_pem(&public_pem)
            .map_err(|e| CryptoError::KeyMaterial(format!("Invalid public key: {}", e)))?;

        if RsaPublicKey::from(&private) != public {
            return Err(CryptoError::KeyMaterial(
                "Public key does not match private key".to_string(),
            ));
        }

        tracing::info!(
            public_key_path = %self.public_key_path.display(),
            "Loaded RSA key pair"
        );
        Ok(KeyPair { public, private })
    }

    async fn generate(&self) -> CryptoResult<KeyPair> {
        let bits = self.rsa_bits;
        let start = std::time::Instant::now();
        let private = tokio::task::spawn_blocking(move || RsaPrivateKey::new(&mut OsRng, bits))
            .await
            .map_err(|e| CryptoError::KeyMaterial(format!("Key generation task failed: {}", e)))?
            .map_err(|e| CryptoError::KeyMaterial(e.to_string()))?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMaterial(e.to_string()))?;
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMaterial(e.to_string()))?;

        write_key_file(&self.private_key_path, private_pem.as_bytes(), true).await?;
        write_key_file(&self.public_key_path, public_pem.as_bytes(), false).await?;

        tracing::info!(
            public_key_path = %self.public_key_path.display(),
            private_key_path = %self.private_key_path.display(),
            rsa_bits = bits,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Generated RSA key pair"
        );
        Ok(KeyPair { public, private })
    }
}

async fn write_key_file(path: &Path, contents: &[u8], secret: bool) -> CryptoResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        if secret {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = secret;

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted.
async fn read_segment<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, path = %path.display(), "Failed to remove partial output");
        }
    }
}

/// Encrypts and decrypts files with a per-file AES key wrapped by RSA.
#[derive(Clone)]
pub struct HybridEncryptionService {
    keys: Arc<KeyStore>,
}

impl HybridEncryptionService {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    pub fn from_config(config: &EncryptionConfig) -> Self {
        Self::new(Arc::new(KeyStore::new(config)))
    }

    /// Use an explicitly provisioned private key; nothing is read from disk.
    pub fn from_keys(private: RsaPrivateKey) -> Self {
        Self::new(Arc::new(KeyStore::from_private_key(private)))
    }

    /// Load (or create) the key pair up front instead of on first use.
    pub async fn ensure_keys(&self) -> CryptoResult<()> {
        self.keys.keys().await.map(|_| ())
    }

    /// Encrypt `input` into `output`, returning the container size in bytes.
    ///
    /// On any failure, cancellation included, the partial output is removed.
    pub async fn encrypt_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> CryptoResult<u64> {
        let result = self.encrypt_file_inner(input, output, cancel).await;
        if result.is_err() {
            remove_partial(output).await;
        }
        result
    }

    async fn encrypt_file_inner(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> CryptoResult<u64> {
        let keys = self.keys.keys().await?;
        let mut reader = File::open(input).await?;

        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut nonce = [0u8; STREAM_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let mut key_material = Vec::with_capacity(KEY_SIZE + STREAM_NONCE_SIZE);
        key_material.extend_from_slice(key.as_slice());
        key_material.extend_from_slice(&nonce);
        let wrapped = keys
            .public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key_material)
            .map_err(|e| CryptoError::KeyWrap(e.to_string()))?;
        let wrapped_len = u32::try_from(wrapped.len())
            .map_err(|_| CryptoError::KeyWrap("Wrapped key too large".to_string()))?;

        let mut writer = BufWriter::new(File::create(output).await?);
        writer.write_all(&wrapped_len.to_le_bytes()).await?;
        writer.write_all(&wrapped).await?;
        let mut written = (LENGTH_PREFIX_SIZE + wrapped.len()) as u64;

        let mut encryptor =
            EncryptorBE32::from_aead(Aes256Gcm::new(&key), GenericArray::from_slice(&nonce));
        let mut buffer = vec![0u8; SEGMENT_SIZE];
        let mut segment: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CryptoError::Cancelled);
            }

            let read = read_segment(&mut reader, &mut buffer).await?;
            if read == SEGMENT_SIZE {
                let sealed = encryptor
                    .encrypt_next(buffer.as_slice())
                    .map_err(|_| CryptoError::Encrypt(format!("segment {}", segment)))?;
                writer.write_all(&sealed).await?;
                written += sealed.len() as u64;
                segment += 1;
            } else {
                let sealed = encryptor
                    .encrypt_last(&buffer[..read])
                    .map_err(|_| CryptoError::Encrypt(format!("final segment {}", segment)))?;
                writer.write_all(&sealed).await?;
                written += sealed.len() as u64;
                break;
            }
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            segments = segment + 1,
            size_bytes = written,
            "File encrypted"
        );
        Ok(written)
    }

    /// Decrypt a container produced by [`encrypt_file`](Self::encrypt_file)
    /// into `output`, returning the plaintext size in bytes.
    pub async fn decrypt_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> CryptoResult<u64> {
        let result = self.decrypt_file_inner(input, output, cancel).await;
        if result.is_err() {
            remove_partial(output).await;
        }
        result
    }

    async fn decrypt_file_inner(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> CryptoResult<u64> {
        let keys = self.keys.keys().await?;
        let mut reader = BufReader::new(File::open(input).await?);

        let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
        if read_segment(&mut reader, &mut len_buf).await? != LENGTH_PREFIX_SIZE {
            return Err(CryptoError::MalformedContainer(
                "truncated length prefix".to_string(),
            ));
        }
        let wrapped_len = u32::from_le_bytes(len_buf) as usize;
        if wrapped_len == 0 || wrapped_len > MAX_WRAPPED_KEY_LEN {
            return Err(CryptoError::MalformedContainer(format!(
                "wrapped key length {} out of range",
                wrapped_len
            )));
        }

        let mut wrapped = vec![0u8; wrapped_len];
        if read_segment(&mut reader, &mut wrapped).await? != wrapped_len {
            return Err(CryptoError::MalformedContainer(
                "truncated wrapped key".to_string(),
            ));
        }

        let key_material = keys
            .private
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map_err(|e| CryptoError::KeyUnwrap(e.to_string()))?;
        if key_material.len() != KEY_SIZE + STREAM_NONCE_SIZE {
            return Err(CryptoError::MalformedContainer(format!(
                "unwrapped key material has {} bytes",
                key_material.len()
            )));
        }
        let (key_bytes, nonce) = key_material.split_at(KEY_SIZE);

        let mut decryptor = DecryptorBE32::from_aead(
            Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes)),
            GenericArray::from_slice(nonce),
        );

        let mut writer = BufWriter::new(File::create(output).await?);
        let mut buffer = vec![0u8; SEGMENT_SIZE + TAG_SIZE];
        let mut segment: u64 = 0;
        let mut written: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CryptoError::Cancelled);
            }

            let read = read_segment(&mut reader, &mut buffer).await?;
            if read == buffer.len() {
                let plain = decryptor
                    .decrypt_next(buffer.as_slice())
                    .map_err(|_| CryptoError::Authentication { segment })?;
                writer.write_all(&plain).await?;
                written += plain.len() as u64;
                segment += 1;
            } else {
                if read < TAG_SIZE {
                    return Err(CryptoError::MalformedContainer(
                        "ciphertext truncated before final segment".to_string(),
                    ));
                }
                let plain = decryptor
                    .decrypt_last(&buffer[..read])
                    .map_err(|_| CryptoError::Authentication { segment })?;
                writer.write_all(&plain).await?;
                written += plain.len() as u64;
                break;
            }
        }

        writer.flush().await?;
        Ok(written)
    }
}
