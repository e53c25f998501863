//! RedisBroker port - The Redis commands the transport relies on.
//!
//! The Redis transport owns all delivery policy (modes, buffering,
//! reconnection). This port is the thin command surface underneath it so the
//! same transport runs against redis-rs in production and an in-memory
//! server in tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

use super::BrokerError;

/// Where an `XREADGROUP` should start reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStart {
    /// Entries already delivered to this consumer but not acknowledged,
    /// strictly after the given id (`"0"` for the beginning).
    Pending(String),
    /// Entries never delivered to the group (`>`).
    New,
}

impl StreamStart {
    /// The id argument passed to `XREADGROUP`.
    pub fn as_id(&self) -> &str {
        match self {
            StreamStart::Pending(cursor) => cursor,
            StreamStart::New => ">",
        }
    }
}

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Only entries added after creation (`$`).
    Tail,
    /// Everything the stream still holds (`0`).
    Beginning,
}

impl GroupStart {
    pub fn as_id(&self) -> &'static str {
        match self {
            GroupStart::Tail => "$",
            GroupStart::Beginning => "0",
        }
    }
}

/// One entry returned by `XREADGROUP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    /// The `payload` field, if the entry carried one.
    pub payload: Option<String>,
}

/// Opens connections to a Redis server.
#[async_trait]
pub trait RedisConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RedisBroker>, BrokerError>;
}

/// An open Redis connection.
#[async_trait]
pub trait RedisBroker: Send + Sync {
    /// Major version reported by `INFO server`, if it could be parsed.
    async fn server_major_version(&self) -> Result<Option<u32>, BrokerError>;

    /// `XADD <stream> MAXLEN ~ <max_len> * payload <payload>`; returns the entry id.
    async fn xadd(&self, stream: &str, max_len: usize, payload: &str) -> Result<String, BrokerError>;

    /// `XGROUP CREATE <stream> <group> <$|0> MKSTREAM`; an existing group is success.
    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BrokerError>;

    /// `XGROUP DELCONSUMER <stream> <group> <consumer>`.
    async fn xgroup_delconsumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<(), BrokerError>;

    /// `XREADGROUP GROUP <group> <consumer> COUNT <count> BLOCK <block> STREAMS <stream> <start>`.
    ///
    /// Pending reads never block.
    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        start: &StreamStart,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError>;

    /// `XACK <stream> <group> <id>`.
    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError>;

    /// `PUBLISH <channel> <payload>`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;

    /// `SUBSCRIBE <channel>` on a dedicated connection.
    ///
    /// The stream ends when that connection is lost.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError>;

    /// Close the connection and every dedicated connection opened from it.
    async fn close(&self);
}
