//! KafkaBroker port - Producer, consumer and admin operations.
//!
//! The Kafka transport keeps the state machine, buffering and partitioning;
//! this port only moves records.

use async_trait::async_trait;
use std::time::Duration;

use super::BrokerError;

/// A record ready to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaRecord {
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub headers: Vec<(String, String)>,
}

impl KafkaRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A record handed back by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Option<String>,
    pub partition: i32,
    pub offset: i64,
}

/// Topic to create when it is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

#[async_trait]
pub trait KafkaBroker: Send + Sync {
    /// Establish producer, consumer and admin connectivity.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Create the topic; "already exists" is success.
    async fn ensure_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError>;

    async fn send(&self, record: KafkaRecord) -> Result<(), BrokerError>;

    /// Replace the consumer's topic subscription; an empty list unsubscribes.
    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next record.
    ///
    /// `Unavailable` means the consumer crashed and must be rebuilt.
    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedRecord>, BrokerError>;

    async fn disconnect(&self);
}
