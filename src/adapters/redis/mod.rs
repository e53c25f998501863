//! Redis transport: streams with consumer groups, Pub/Sub fan-out on older
//! servers, in-process delivery when no broker is configured.
//!
//! - `RedisEventTransport` - The transport state machine
//! - `RedisClientConnector` - redis-rs connections
//! - `InMemoryRedisServer` - Deterministic server for tests

mod client;
mod in_memory;
mod transport;

pub use client::{parse_major_version, RedisClientBroker, RedisClientConnector};
pub use in_memory::{InMemoryRedisBroker, InMemoryRedisConnector, InMemoryRedisServer};
pub use transport::{
    default_consumer_name, stream_key, RedisConnectionPhase, RedisEventTransport,
    RedisTransportSettings, REDIS_KEY_PREFIX,
};
