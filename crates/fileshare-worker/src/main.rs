use std::sync::Arc;

use anyhow::Context;
use fileshare_core::{Config, HybridEncryptionService};
use fileshare_db::{setup_database, PgMetadataRepository};
use fileshare_processing::{default_pipeline, PipelineServices};
use fileshare_storage::create_storage;
use fileshare_worker::telemetry::init_telemetry;
use fileshare_worker::{AmqpOutcomePublisher, MessageProcessor, QueueConsumer, RedeliveryPolicy};
use tokio_util::sync::CancellationToken;

const SERVICE_NAME: &str = "fileshare-worker";

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    init_telemetry(SERVICE_NAME, &config.environment)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage_backend = %config.storage.backend,
        work_dir = %config.work_dir.display(),
        "Starting file processing worker"
    );

    let pool = setup_database(&config.database).await?;
    let repository = Arc::new(PgMetadataRepository::new(pool));

    let storage = create_storage(&config.storage)
        .await
        .context("Failed to initialize object storage")?;

    if config.is_production() && config.encryption.auto_generate {
        tracing::warn!(
            public_key_path = %config.encryption.public_key_path.display(),
            "Key auto-generation is enabled in production; a missing key pair will be replaced"
        );
    }
    let encryption = HybridEncryptionService::from_config(&config.encryption);
    encryption
        .ensure_keys()
        .await
        .context("Failed to load encryption keys")?;

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create work directory {}", config.work_dir.display()))?;

    let pipeline = default_pipeline(PipelineServices {
        encryption,
        storage,
        repository,
        original_bucket: config.storage.original_bucket.clone(),
        encrypted_bucket: config.storage.encrypted_bucket.clone(),
    })?;
    tracing::info!(stages = ?pipeline.stage_names(), "Pipeline assembled");

    let publisher = Arc::new(AmqpOutcomePublisher::new(&config.amqp));
    let processor = Arc::new(MessageProcessor::new(
        Arc::new(pipeline),
        publisher.clone(),
        RedeliveryPolicy::new(config.amqp.max_delivery_attempts),
        config.work_dir.clone(),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let mut consumer = QueueConsumer::new(config.amqp.clone(), processor, publisher);
    consumer.run(shutdown).await?;

    tracing::info!("Worker exited cleanly");
    Ok(())
}

/// Cancel `token` on Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
    token.cancel();
}
