//! Outcome event publication.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fileshare_core::{AmqpConfig, FileProcessedEvent, FILE_PROCESSED_EVENT_TYPE};
use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

const SOURCE_SERVICE: &str = "fileshare-worker";
const PERSISTENT: u8 = 2;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Broker rejected publish: {0}")]
    Broker(#[from] lapin::Error),

    #[error("No broker channel available")]
    NotConnected,
}

#[async_trait]
pub trait OutcomePublisher: Send + Sync {
    async fn publish(&self, event: &FileProcessedEvent) -> Result<(), PublishError>;
}

/// Publishes outcome events to the topic exchange.
///
/// The channel is swapped in by the consumer every time it (re)connects.
pub struct AmqpOutcomePublisher {
    exchange: String,
    routing_key: String,
    channel: RwLock<Option<Channel>>,
}

impl AmqpOutcomePublisher {
    pub fn new(config: &AmqpConfig) -> Self {
        Self::with_routing(&config.exchange, &config.outcome_routing_key)
    }

    pub fn with_routing(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            channel: RwLock::new(None),
        }
    }

    pub async fn set_channel(&self, channel: Channel) {
        *self.channel.write().await = Some(channel);
    }

    pub async fn clear_channel(&self) {
        *self.channel.write().await = None;
    }

    fn properties(event: &FileProcessedEvent) -> BasicProperties {
        let correlation_id = event.correlation_id.to_string();
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from("x-correlation-id"),
            AMQPValue::LongString(LongString::from(correlation_id.clone())),
        );
        headers.insert(
            ShortString::from("x-source-service"),
            AMQPValue::LongString(LongString::from(SOURCE_SERVICE)),
        );

        BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(PERSISTENT)
            .with_correlation_id(ShortString::from(correlation_id))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_timestamp(Utc::now().timestamp().max(0) as u64)
            .with_kind(ShortString::from(FILE_PROCESSED_EVENT_TYPE))
            .with_app_id(ShortString::from(SOURCE_SERVICE))
            .with_headers(headers)
    }
}

#[async_trait]
impl OutcomePublisher for AmqpOutcomePublisher {
    #[tracing::instrument(skip(self, event), fields(file_id = %event.file_id, status = %event.status))]
    async fn publish(&self, event: &FileProcessedEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        let channel = self
            .channel
            .read()
            .await
            .clone()
            .ok_or(PublishError::NotConnected)?;

        channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &payload,
                Self::properties(event),
            )
            .await?
            .await?;

        tracing::info!(
            exchange = %self.exchange,
            routing_key = %self.routing_key,
            "Outcome event published"
        );
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<FileProcessedEvent>>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every publish fails with [`PublishError::NotConnected`].
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn events(&self) -> Vec<FileProcessedEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl OutcomePublisher for RecordingPublisher {
    async fn publish(&self, event: &FileProcessedEvent) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::NotConnected);
        }
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileshare_core::ProcessingContext;

    fn event() -> FileProcessedEvent {
        let ctx = ProcessingContext::new(Uuid::new_v4(), Uuid::new_v4(), "a.txt", "/tmp/a.txt");
        FileProcessedEvent::from_context(&ctx)
    }

    #[test]
    fn test_properties() {
        let event = event();
        let props = AmqpOutcomePublisher::properties(&event);

        assert_eq!(props.delivery_mode(), &Some(PERSISTENT));
        assert_eq!(
            props.content_type().as_ref().map(|s| s.as_str()),
            Some("application/json")
        );
        assert_eq!(
            props.kind().as_ref().map(|s| s.as_str()),
            Some(FILE_PROCESSED_EVENT_TYPE)
        );
        let correlation = event.correlation_id.to_string();
        assert_eq!(
            props.correlation_id().as_ref().map(|s| s.as_str()),
            Some(correlation.as_str())
        );
        let headers = props.headers().as_ref().unwrap();
        assert!(headers
            .inner()
            .keys()
            .any(|k| k.as_str() == "x-source-service"));
    }

    #[tokio::test]
    async fn test_publish_without_channel_fails() {
        let publisher = AmqpOutcomePublisher::with_routing("file-exchange", "file.processed");
        assert!(matches!(
            publisher.publish(&event()).await,
            Err(PublishError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_recording_publisher() {
        let publisher = RecordingPublisher::new();
        publisher.publish(&event()).await.unwrap();
        assert_eq!(publisher.events().await.len(), 1);
        assert!(RecordingPublisher::failing().publish(&event()).await.is_err());
    }
}
