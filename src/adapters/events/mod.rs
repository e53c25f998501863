//! Event bus adapters shared by every transport.
//!
//! - `InMemoryEventBus` - Synchronous, in-process bus for testing
//! - `IdempotentSubscriber` - Dedup, retry and dead-letter policy over any transport
//! - `IdempotentHandler` - The per-registration wrapper it installs
//! - `InMemoryProcessedEventCache` - Bounded, TTL'd processed-event records
//! - `create_event_transport` - Provider selection from configuration

pub(crate) mod backoff;
pub(crate) mod counters;
mod factory;
mod idempotent_handler;
mod idempotent_subscriber;
mod in_memory;
mod metrics;
mod processed_event_cache;
pub(crate) mod registry;
pub(crate) mod sync;

pub use backoff::ExponentialBackoff;
pub use factory::{
    create_event_transport, create_kafka_transport_with, create_redis_transport,
    kafka_transport_settings, redis_transport_settings,
};
pub use idempotent_handler::{IdempotentHandler, SubscriptionOptions};
pub use idempotent_subscriber::IdempotentSubscriber;
pub use in_memory::{InMemoryEventBus, RecordedDeadLetter};
pub use metrics::{NoopMetricsSink, TracingMetricsSink};
pub use processed_event_cache::InMemoryProcessedEventCache;
pub use registry::HandlerRegistry;
