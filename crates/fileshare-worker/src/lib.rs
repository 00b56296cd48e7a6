//! Queue worker: consumes upload notifications, runs the processing
//! pipeline and publishes the outcome.
//!
//! [`MessageProcessor`] holds everything that does not depend on the broker
//! (payload decoding, the pipeline run, the ack decision) so it can be driven
//! directly in tests. [`QueueConsumer`] wraps it with the AMQP connection,
//! topology and delivery acknowledgement.

pub mod consumer;
pub mod processor;
pub mod publisher;
pub mod redelivery;
pub mod telemetry;

pub use consumer::{ConsumerError, ConsumerState, QueueConsumer};
pub use processor::MessageProcessor;
pub use publisher::{AmqpOutcomePublisher, OutcomePublisher, PublishError, RecordingPublisher};
pub use redelivery::{Disposition, RedeliveryPolicy};
