//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the event bus core to external systems:
//! - `events` - Shared machinery, the in-process bus and the idempotent subscriber
//! - `redis` - Redis Streams / Pub/Sub transport
//! - `kafka` - Kafka transport

pub mod events;
pub mod kafka;
pub mod redis;

pub use events::{
    create_event_transport, IdempotentSubscriber, InMemoryEventBus, InMemoryProcessedEventCache,
    SubscriptionOptions,
};
pub use kafka::KafkaEventTransport;
pub use redis::RedisEventTransport;
