//! AMQP consumption loop
//!
//! State machine: `Disconnected -> Connecting -> Consuming`, back to
//! `Connecting` after a transport loss, `Stopped` on shutdown. Connection
//! attempts back off exponentially and give up with
//! [`ConsumerError::ConnectionExhausted`]. Shutdown stops consumption between
//! messages; the message in flight sees the same token and is requeued if its
//! run is cut short.

use std::sync::Arc;

use fileshare_core::AmqpConfig;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::processor::MessageProcessor;
use crate::publisher::AmqpOutcomePublisher;
use crate::redelivery::{connect_backoff, Disposition, DEATH_REASON_HEADER, RETRY_COUNT_HEADER};

/// Routing key binding every message to the dead-letter queue.
const DEAD_LETTER_BINDING: &str = "#";

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Broker unreachable after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    #[error("Consumer stream closed by broker")]
    StreamClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Consuming,
    Stopped,
}

pub struct QueueConsumer {
    config: AmqpConfig,
    processor: Arc<MessageProcessor>,
    publisher: Arc<AmqpOutcomePublisher>,
    state: ConsumerState,
}

impl QueueConsumer {
    pub fn new(
        config: AmqpConfig,
        processor: Arc<MessageProcessor>,
        publisher: Arc<AmqpOutcomePublisher>,
    ) -> Self {
        Self {
            config,
            processor,
            publisher,
            state: ConsumerState::Disconnected,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    fn transition(&mut self, next: ConsumerState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Consumer state change");
            self.state = next;
        }
    }

    /// Consume until `shutdown` is cancelled or the broker stays unreachable.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        loop {
            if shutdown.is_cancelled() {
                self.transition(ConsumerState::Stopped);
                return Ok(());
            }

            self.transition(ConsumerState::Connecting);
            let Some(connection) = self.connect_with_backoff(&shutdown).await? else {
                self.transition(ConsumerState::Stopped);
                return Ok(());
            };

            let channel = connection.create_channel().await?;
            let consumer = self.declare_topology(&channel).await?;
            self.publisher.set_channel(channel.clone()).await;
            self.transition(ConsumerState::Consuming);
            tracing::info!(
                queue = %self.config.queue,
                exchange = %self.config.exchange,
                routing_key = %self.config.routing_key,
                prefetch = self.config.prefetch,
                "Consuming messages"
            );

            let result = self.consume(consumer, &channel, &shutdown).await;
            self.publisher.clear_channel().await;

            match result {
                Ok(()) => {
                    if let Err(e) = connection.close(200, "worker shutdown").await {
                        tracing::debug!(error = %e, "Error closing broker connection");
                    }
                    self.transition(ConsumerState::Stopped);
                    tracing::info!("Consumer stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Lost broker transport; reconnecting");
                    self.transition(ConsumerState::Disconnected);
                }
            }
        }
    }

    /// `Ok(None)` when shutdown was requested while waiting to retry.
    async fn connect_with_backoff(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Connection>, ConsumerError> {
        let max_attempts = self.config.connect_max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            match Connection::connect(&self.config.url, ConnectionProperties::default()).await {
                Ok(connection) => {
                    tracing::info!(attempt = attempt + 1, "Connected to broker");
                    return Ok(Some(connection));
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 == max_attempts {
                        break;
                    }
                    let delay = connect_backoff(
                        attempt,
                        self.config.connect_backoff_base_ms,
                        self.config.connect_backoff_max_ms,
                    );
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker connection failed; retrying"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::error!(attempts = max_attempts, error = %last_error, "Giving up on broker connection");
        Err(ConsumerError::ConnectionExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn declare_topology(&self, channel: &Channel) -> Result<Consumer, ConsumerError> {
        let durable_exchange = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };
        let durable_queue = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                durable_exchange,
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(&self.config.queue, durable_queue, FieldTable::default())
            .await?;
        channel
            .queue_bind(
                &self.config.queue,
                &self.config.exchange,
                &self.config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        channel
            .exchange_declare(
                &self.config.dead_letter_exchange,
                ExchangeKind::Topic,
                durable_exchange,
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(
                &self.config.dead_letter_queue,
                durable_queue,
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                &self.config.dead_letter_queue,
                &self.config.dead_letter_exchange,
                DEAD_LETTER_BINDING,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                &self.config.queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    /// `Ok(())` on shutdown, `Err` on transport loss.
    async fn consume(
        &self,
        mut consumer: Consumer,
        channel: &Channel,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(delivery) => delivery?,
                None => return Err(ConsumerError::StreamClosed),
            };
            self.handle_delivery(channel, delivery, shutdown).await?;
        }
    }

    #[tracing::instrument(skip_all, fields(delivery_tag = delivery.delivery_tag))]
    async fn handle_delivery(
        &self,
        channel: &Channel,
        delivery: Delivery,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        let retry_count = retry_count(delivery.properties.headers().as_ref());
        let disposition = self
            .processor
            .process(&delivery.data, retry_count, shutdown)
            .await;
        tracing::debug!(disposition = ?disposition, "Applying disposition");

        match disposition {
            Disposition::Ack | Disposition::Drop => {
                delivery.ack(BasicAckOptions::default()).await?;
            }
            Disposition::Requeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await?;
            }
            Disposition::Retry { attempt } => {
                let headers = with_header(
                    &delivery.properties,
                    RETRY_COUNT_HEADER,
                    AMQPValue::LongUInt(attempt),
                );
                // Default exchange, so only the work queue receives the retry.
                channel
                    .basic_publish(
                        "",
                        &self.config.queue,
                        BasicPublishOptions::default(),
                        &delivery.data,
                        delivery.properties.clone().with_headers(headers),
                    )
                    .await?
                    .await?;
                delivery.ack(BasicAckOptions::default()).await?;
                tracing::warn!(attempt = attempt, "Message scheduled for retry");
            }
            Disposition::DeadLetter { reason } => {
                let mut headers = with_header(
                    &delivery.properties,
                    RETRY_COUNT_HEADER,
                    AMQPValue::LongUInt(retry_count),
                );
                headers.insert(
                    ShortString::from(DEATH_REASON_HEADER),
                    AMQPValue::LongString(LongString::from(reason.clone())),
                );
                channel
                    .basic_publish(
                        &self.config.dead_letter_exchange,
                        delivery.routing_key.as_str(),
                        BasicPublishOptions::default(),
                        &delivery.data,
                        delivery.properties.clone().with_headers(headers),
                    )
                    .await?
                    .await?;
                delivery.ack(BasicAckOptions::default()).await?;
                tracing::error!(reason = %reason, retry_count = retry_count, "Message dead-lettered");
            }
        }
        Ok(())
    }
}

/// Copy of the message headers with `name` set to `value`.
fn with_header(properties: &BasicProperties, name: &str, value: AMQPValue) -> FieldTable {
    let mut headers = properties.headers().clone().unwrap_or_default();
    headers.insert(ShortString::from(name), value);
    headers
}

/// Read [`RETRY_COUNT_HEADER`], accepting any integer width or a numeric
/// string. Missing or unreadable values count as zero.
pub fn retry_count(headers: Option<&FieldTable>) -> u32 {
    let Some(value) = headers.and_then(|table| {
        table
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
            .map(|(_, value)| value)
    }) else {
        return 0;
    };

    let count: i64 = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes())
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0),
        AMQPValue::ShortString(s) => s.as_str().trim().parse().unwrap_or(0),
        _ => 0,
    };
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}
