//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the event bus core and the outside world. Adapters implement these ports.
//!
//! ## Event Ports
//!
//! - `EventPublisher` - Port for publishing events
//! - `EventSubscriber` - Port for subscribing to events
//! - `EventHandler` - Handler that processes incoming events
//! - `EventTransport` - Publisher + subscriber + lifecycle, one per broker
//! - `ProcessedEventStore` - Idempotency tracking for event handlers
//! - `MetricsSink` - Side channel for transport metrics
//!
//! ## Broker Ports
//!
//! - `RedisConnector` / `RedisBroker` - Redis streams and Pub/Sub commands
//! - `KafkaBroker` - Kafka producer, consumer and admin operations

mod broker_error;
mod event_publisher;
mod event_subscriber;
mod event_transport;
mod kafka_broker;
mod metrics_sink;
mod processed_event_store;
mod redis_broker;

pub use broker_error::BrokerError;
pub use event_publisher::{EventPublisher, PublishOutcome};
pub use event_subscriber::{EventHandler, EventSubscriber};
pub use event_transport::EventTransport;
pub use kafka_broker::{ConsumedRecord, KafkaBroker, KafkaRecord, TopicSpec};
pub use metrics_sink::MetricsSink;
pub use processed_event_store::ProcessedEventStore;
pub use redis_broker::{GroupStart, RedisBroker, RedisConnector, StreamEntry, StreamStart};
