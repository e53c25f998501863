//! redis-rs implementation of the Redis broker ports.
//!
//! Ordinary commands share one multiplexed connection. Blocking
//! `XREADGROUP` calls get a dedicated connection per stream so a long
//! `BLOCK` never stalls publishing, and every Pub/Sub subscription opens its
//! own connection as the protocol requires.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ports::{
    BrokerError, GroupStart, RedisBroker, RedisConnector, StreamEntry, StreamStart,
};

/// Map a redis-rs error onto the broker taxonomy.
fn map_error(err: RedisError) -> BrokerError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        return BrokerError::Unavailable(err.to_string());
    }
    match err.code() {
        Some("NOGROUP") => BrokerError::NoGroup(err.to_string()),
        _ => BrokerError::Rejected(err.to_string()),
    }
}

/// Extract the major version from `INFO server` output.
pub fn parse_major_version(info: &str) -> Option<u32> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("redis_version:"))
        .and_then(|version| version.split('.').next())
        .and_then(|major| major.trim().parse().ok())
}

/// Opens redis-rs connections for one URL.
pub struct RedisClientConnector {
    client: redis::Client,
}

impl RedisClientConnector {
    /// Fails only when the URL cannot be parsed; nothing is dialled yet.
    pub fn new(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)
            .map_err(|e| BrokerError::Rejected(format!("invalid Redis URL: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RedisConnector for RedisClientConnector {
    async fn connect(&self) -> Result<Arc<dyn RedisBroker>, BrokerError> {
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(map_error)?;
        Ok(Arc::new(RedisClientBroker {
            client: self.client.clone(),
            conn,
            readers: Mutex::new(HashMap::new()),
        }))
    }
}

/// One logical connection to Redis.
pub struct RedisClientBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisClientBroker {
    async fn reader_for(&self, stream: &str) -> Result<MultiplexedConnection, BrokerError> {
        let mut readers = self.readers.lock().await;
        if let Some(conn) = readers.get(stream) {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(map_error)?;
        readers.insert(stream.to_string(), conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl RedisBroker for RedisClientBroker {
    async fn server_major_version(&self) -> Result<Option<u32>, BrokerError> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO")
            .arg("server")
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(parse_major_version(&info))
    }

    async fn xadd(&self, stream: &str, max_len: usize, payload: &str) -> Result<String, BrokerError> {
        let mut conn = self.conn.clone();
        conn.xadd_maxlen(stream, StreamMaxlen::Approx(max_len), "*", &[("payload", payload)])
            .await
            .map_err(map_error)
    }

    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = conn
            .xgroup_create_mkstream(stream, group, start.as_id())
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream, group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn xgroup_delconsumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xgroup_delconsumer(stream, group, consumer)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        start: &StreamStart,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        if matches!(start, StreamStart::New) && !block.is_zero() {
            options = options.block(block.as_millis() as usize);
        }

        let mut conn = self.reader_for(stream).await?;
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[start.as_id()], &options)
            .await
            .map_err(map_error)?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(|id| StreamEntry {
                        payload: id.get::<String>("payload"),
                        id: id.id,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await.map_err(map_error)?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, payload).await.map_err(map_error)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError> {
        let conn = self.client.get_async_connection().await.map_err(map_error)?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await.map_err(map_error)?;

        Ok(pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() })
            .boxed())
    }

    async fn close(&self) {
        self.readers.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_version_from_info() {
        let info = "# Server\r\nredis_version:7.2.4\r\nredis_git_sha1:00000000\r\n";
        assert_eq!(parse_major_version(info), Some(7));
    }

    #[test]
    fn old_servers_report_low_major() {
        assert_eq!(parse_major_version("redis_version:4.0.14\n"), Some(4));
    }

    #[test]
    fn missing_version_is_none() {
        assert_eq!(parse_major_version("# Server\nuptime_in_days:3\n"), None);
    }

    #[test]
    fn malformed_url_is_rejected() {
        assert!(RedisClientConnector::new("not a url").is_err());
    }

    #[test]
    fn well_formed_url_does_not_dial() {
        assert!(RedisClientConnector::new("redis://127.0.0.1:1/").is_ok());
    }
}
