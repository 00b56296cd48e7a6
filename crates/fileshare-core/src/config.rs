//! Configuration module
//!
//! Worker configuration is read from the environment (optionally seeded from a
//! `.env` file) and grouped by collaborator: broker, object storage, metadata
//! database and key material.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::storage_types::StorageBackend;

// Common constants
const AMQP_EXCHANGE: &str = "file-exchange";
const AMQP_QUEUE: &str = "documents";
const AMQP_ROUTING_KEY: &str = "file.uploaded";
const AMQP_OUTCOME_ROUTING_KEY: &str = "file.processed";
const AMQP_PREFETCH: u16 = 1;
const AMQP_CONNECT_MAX_ATTEMPTS: u32 = 5;
const AMQP_CONNECT_BACKOFF_BASE_MS: u64 = 1000;
const AMQP_CONNECT_BACKOFF_MAX_MS: u64 = 30_000;
const MAX_DELIVERY_ATTEMPTS: u32 = 5;
const ORIGINAL_BUCKET: &str = "original-files";
const ENCRYPTED_BUCKET: &str = "encrypted-files";
const MAX_CONNECTIONS: u32 = 5;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const RSA_BITS: usize = 2048;
const MIN_RSA_BITS: usize = 2048;

/// Broker topology and connection behaviour
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    pub url: String,
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub outcome_routing_key: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub prefetch: u16,
    pub connect_max_attempts: u32,
    pub connect_backoff_base_ms: u64,
    pub connect_backoff_max_ms: u64,
    /// Deliveries (first attempt included) before a message is dead-lettered.
    pub max_delivery_attempts: u32,
    pub consumer_tag: String,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_endpoint: Option<String>, // MinIO and other S3-compatible providers
    pub s3_region: String,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_force_path_style: bool,
    pub local_storage_path: Option<String>,
    pub original_bucket: String,
    pub encrypted_bucket: String,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct EncryptionConfig {
    pub public_key_path: PathBuf,
    pub private_key_path: PathBuf,
    pub rsa_bits: usize,
    /// Generate a fresh key pair when either PEM file is missing.
    pub auto_generate: bool,
}

/// Worker configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    /// Scratch directory holding per-run copies of staged uploads.
    pub work_dir: PathBuf,
    pub amqp: AmqpConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub encryption: EncryptionConfig,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Check if the worker is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let exchange = env_string("AMQP_EXCHANGE", AMQP_EXCHANGE);
        let queue = env_string("AMQP_QUEUE", AMQP_QUEUE);

        let amqp = AmqpConfig {
            url: env::var("AMQP_URL")
                .or_else(|_| env::var("RABBITMQ_URL"))
                .map_err(|_| anyhow::anyhow!("AMQP_URL must be set"))?,
            dead_letter_exchange: env::var("AMQP_DEAD_LETTER_EXCHANGE")
                .unwrap_or_else(|_| format!("{}.dlx", exchange)),
            dead_letter_queue: env::var("AMQP_DEAD_LETTER_QUEUE")
                .unwrap_or_else(|_| format!("{}.dead-letter", queue)),
            exchange,
            queue,
            routing_key: env_string("AMQP_ROUTING_KEY", AMQP_ROUTING_KEY),
            outcome_routing_key: env_string("AMQP_OUTCOME_ROUTING_KEY", AMQP_OUTCOME_ROUTING_KEY),
            prefetch: env_or("AMQP_PREFETCH", AMQP_PREFETCH),
            connect_max_attempts: env_or("AMQP_CONNECT_MAX_ATTEMPTS", AMQP_CONNECT_MAX_ATTEMPTS),
            connect_backoff_base_ms: env_or(
                "AMQP_CONNECT_BACKOFF_BASE_MS",
                AMQP_CONNECT_BACKOFF_BASE_MS,
            ),
            connect_backoff_max_ms: env_or(
                "AMQP_CONNECT_BACKOFF_MAX_MS",
                AMQP_CONNECT_BACKOFF_MAX_MS,
            ),
            max_delivery_attempts: env_or("MAX_DELIVERY_ATTEMPTS", MAX_DELIVERY_ATTEMPTS),
            consumer_tag: env::var("AMQP_CONSUMER_TAG").unwrap_or_else(|_| {
                let host = hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("fileshare-worker-{}", host)
            }),
        };

        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::S3,
        };

        let storage = StorageConfig {
            backend,
            s3_endpoint: env::var("S3_ENDPOINT")
                .or_else(|_| env::var("MINIO_ENDPOINT"))
                .ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| "us-east-1".to_string()),
            s3_access_key_id: env::var("S3_ACCESS_KEY_ID")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            s3_secret_access_key: env::var("S3_SECRET_ACCESS_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            s3_force_path_style: env_or("S3_FORCE_PATH_STYLE", true),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            original_bucket: env_string("ORIGINAL_BUCKET", ORIGINAL_BUCKET),
            encrypted_bucket: env_string("ENCRYPTED_BUCKET", ENCRYPTED_BUCKET),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
        };

        let encryption = EncryptionConfig {
            public_key_path: env_string("ENCRYPTION_PUBLIC_KEY_PATH", "/app/keys/public.pem").into(),
            private_key_path: env_string("ENCRYPTION_PRIVATE_KEY_PATH", "/app/keys/private.pem")
                .into(),
            rsa_bits: env_or("ENCRYPTION_RSA_BITS", RSA_BITS),
            auto_generate: env_or("KEY_AUTO_GENERATE", true),
        };

        let work_dir = env::var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("fileshare"));

        let config = Config {
            environment,
            work_dir,
            amqp,
            storage,
            database,
            encryption,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.amqp.url.starts_with("amqp://") || self.amqp.url.starts_with("amqps://")) {
            return Err(anyhow::anyhow!(
                "AMQP_URL must be an amqp:// or amqps:// connection string"
            ));
        }

        if self.amqp.prefetch == 0 {
            return Err(anyhow::anyhow!("AMQP_PREFETCH must be at least 1"));
        }

        if self.amqp.connect_max_attempts == 0 {
            return Err(anyhow::anyhow!("AMQP_CONNECT_MAX_ATTEMPTS must be at least 1"));
        }

        if self.amqp.max_delivery_attempts == 0 {
            return Err(anyhow::anyhow!("MAX_DELIVERY_ATTEMPTS must be at least 1"));
        }

        if self.amqp.exchange == self.amqp.dead_letter_exchange {
            return Err(anyhow::anyhow!(
                "AMQP_DEAD_LETTER_EXCHANGE must differ from AMQP_EXCHANGE"
            ));
        }

        if !(self.database.url.starts_with("postgres://")
            || self.database.url.starts_with("postgresql://"))
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        for bucket in [&self.storage.original_bucket, &self.storage.encrypted_bucket] {
            if !is_valid_bucket_name(bucket) {
                return Err(anyhow::anyhow!("Invalid bucket name: {}", bucket));
            }
        }

        if self.storage.original_bucket == self.storage.encrypted_bucket {
            return Err(anyhow::anyhow!(
                "ORIGINAL_BUCKET and ENCRYPTED_BUCKET must be distinct"
            ));
        }

        match self.storage.backend {
            StorageBackend::S3 => {
                if self.storage.s3_access_key_id.is_some()
                    != self.storage.s3_secret_access_key.is_some()
                {
                    return Err(anyhow::anyhow!(
                        "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.storage.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
        }

        if self.encryption.rsa_bits < MIN_RSA_BITS {
            return Err(anyhow::anyhow!(
                "ENCRYPTION_RSA_BITS must be at least {}",
                MIN_RSA_BITS
            ));
        }

        if self.encryption.public_key_path == self.encryption.private_key_path {
            return Err(anyhow::anyhow!(
                "Public and private key paths must point to different files"
            ));
        }

        Ok(())
    }
}

/// S3 bucket naming rules (length, charset, no leading/trailing separator)
fn is_valid_bucket_name(name: &str) -> bool {
    let len_ok = (3..=63).contains(&name.len());
    let charset_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let edges_ok = name
        .chars()
        .next()
        .zip(name.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);
    len_ok && charset_ok && edges_ok
}
