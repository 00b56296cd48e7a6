//! File metadata repository: upserts and lookups on the file_metadata table.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileshare_core::{DatabaseConfig, FileMetadataDocument, FileProcessingStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::repository::{MetadataRepository, RepositoryResult, UpsertOutcome};

/// Connect to PostgreSQL and apply pending migrations
pub async fn setup_database(config: &DatabaseConfig) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.max_connections,
        "Database connected successfully"
    );

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Row type for file_metadata table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
struct FileMetadataRow {
    file_id: Uuid,
    user_id: Uuid,
    original_file_name: String,
    stored_file_name: String,
    content_type: String,
    file_size: i64,
    hash: Option<String>,
    hash_algorithm: String,
    object_key: Option<String>,
    original_object_key: Option<String>,
    bucket: Option<String>,
    original_bucket: Option<String>,
    is_encrypted: bool,
    is_decryption_validated: bool,
    description: Option<String>,
    status: FileProcessingStatus,
    error_message: Option<String>,
    custom_metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl FileMetadataRow {
    fn into_document(self) -> FileMetadataDocument {
        FileMetadataDocument {
            file_id: self.file_id,
            user_id: self.user_id,
            original_file_name: self.original_file_name,
            stored_file_name: self.stored_file_name,
            content_type: self.content_type,
            file_size: self.file_size,
            hash: self.hash,
            hash_algorithm: self.hash_algorithm,
            object_key: self.object_key,
            original_object_key: self.original_object_key,
            bucket: self.bucket,
            original_bucket: self.original_bucket,
            is_encrypted: self.is_encrypted,
            is_decryption_validated: self.is_decryption_validated,
            description: self.description,
            status: self.status,
            error_message: self.error_message,
            custom_metadata: self.custom_metadata,
            created_at: self.created_at,
            processed_at: self.processed_at,
        }
    }
}

/// Repository for file_metadata table.
#[derive(Clone)]
pub struct PgMetadataRepository {
    pool: PgPool,
}

impl PgMetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataRepository for PgMetadataRepository {
    #[tracing::instrument(skip(self, doc), fields(db.table = "file_metadata", db.record_id = %doc.file_id, status = %doc.status))]
    async fn upsert(&self, doc: &FileMetadataDocument) -> RepositoryResult<UpsertOutcome> {
        let written: Option<Uuid> = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            INSERT INTO file_metadata (
                file_id, user_id, original_file_name, stored_file_name, content_type,
                file_size, hash, hash_algorithm, object_key, original_object_key,
                bucket, original_bucket, is_encrypted, is_decryption_validated, description,
                status, error_message, custom_metadata, created_at, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (file_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                original_file_name = EXCLUDED.original_file_name,
                stored_file_name = EXCLUDED.stored_file_name,
                content_type = EXCLUDED.content_type,
                file_size = EXCLUDED.file_size,
                hash = EXCLUDED.hash,
                hash_algorithm = EXCLUDED.hash_algorithm,
                object_key = EXCLUDED.object_key,
                original_object_key = EXCLUDED.original_object_key,
                bucket = EXCLUDED.bucket,
                original_bucket = EXCLUDED.original_bucket,
                is_encrypted = EXCLUDED.is_encrypted,
                is_decryption_validated = EXCLUDED.is_decryption_validated,
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                custom_metadata = EXCLUDED.custom_metadata,
                processed_at = EXCLUDED.processed_at,
                updated_at = NOW()
            WHERE file_metadata.status <> 'Completed' OR EXCLUDED.status = 'Completed'
            RETURNING file_id
            "#,
        )
        .bind(doc.file_id)
        .bind(doc.user_id)
        .bind(&doc.original_file_name)
        .bind(&doc.stored_file_name)
        .bind(&doc.content_type)
        .bind(doc.file_size)
        .bind(&doc.hash)
        .bind(&doc.hash_algorithm)
        .bind(&doc.object_key)
        .bind(&doc.original_object_key)
        .bind(&doc.bucket)
        .bind(&doc.original_bucket)
        .bind(doc.is_encrypted)
        .bind(doc.is_decryption_validated)
        .bind(&doc.description)
        .bind(doc.status)
        .bind(&doc.error_message)
        .bind(&doc.custom_metadata)
        .bind(doc.created_at)
        .bind(doc.processed_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match written {
            Some(_) => UpsertOutcome::Written,
            None => UpsertOutcome::KeptCompleted,
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "file_metadata", db.record_id = %file_id))]
    async fn get_by_file_id(&self, file_id: Uuid) -> RepositoryResult<Option<FileMetadataDocument>> {
        let row: Option<FileMetadataRow> = sqlx::query_as::<Postgres, FileMetadataRow>(
            r#"
            SELECT file_id, user_id, original_file_name, stored_file_name, content_type,
                   file_size, hash, hash_algorithm, object_key, original_object_key,
                   bucket, original_bucket, is_encrypted, is_decryption_validated, description,
                   status, error_message, custom_metadata, created_at, processed_at
            FROM file_metadata
            WHERE file_id = $1
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FileMetadataRow::into_document))
    }
}
