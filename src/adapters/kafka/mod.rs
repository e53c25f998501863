//! Kafka transport: partitioned topics, bounded buffering with disk
//! overflow, dead-lettering.
//!
//! - `KafkaEventTransport` - The transport state machine
//! - `PrefixFieldPartitioner` - Default partition key rules
//! - `InMemoryKafkaBroker` - Loopback broker for tests
//! - `RdKafkaBroker` - librdkafka client, behind the `kafka` feature

mod buffer;
mod in_memory;
mod overflow;
mod partition;
#[cfg(feature = "kafka")]
mod rdkafka_client;
mod transport;

pub use buffer::{PendingBuffer, Pushed};
pub use in_memory::InMemoryKafkaBroker;
pub use overflow::{OverflowError, OverflowLog};
pub use partition::{
    resolve_partition_key, PartitionKeyStrategy, PrefixFieldPartitioner,
    DEFAULT_PARTITION_KEY_FIELDS,
};
#[cfg(feature = "kafka")]
pub use rdkafka_client::{RdKafkaBroker, RdKafkaSettings};
pub use transport::{
    consumer_group, topic_for, KafkaConnectionState, KafkaEventTransport, KafkaTransportSettings,
    KAFKA_TOPIC_PREFIX,
};
