//! Kafka transport configuration

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::kafka::{PrefixFieldPartitioner, DEFAULT_PARTITION_KEY_FIELDS};

/// Kafka configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap brokers (comma-separated)
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Client id; defaults to the service name
    #[serde(default)]
    pub client_id: Option<String>,

    /// Pending buffer capacity while disconnected
    #[serde(default = "default_buffer_max")]
    pub buffer_max: usize,

    /// Depth at which one warning is logged
    #[serde(default = "default_buffer_warn_at")]
    pub buffer_warn_at: usize,

    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Attempts before the transport gives up and stays degraded
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    #[serde(default = "default_topic_partitions")]
    pub topic_partitions: i32,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,

    #[serde(default = "default_auto_create_topics")]
    pub auto_create_topics: bool,

    #[serde(default = "default_shutdown_drain_timeout_ms")]
    pub shutdown_drain_timeout_ms: u64,

    /// Directory for the overflow file; defaults to the OS temp dir
    #[serde(default)]
    pub overflow_dir: Option<PathBuf>,

    /// Consumer poll timeout in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Producer delivery timeout in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Partition key rules, `pattern:field` comma-separated
    #[serde(default = "default_partition_key_fields")]
    pub partition_key_fields: String,
}

impl KafkaConfig {
    /// Get brokers as a vector
    pub fn broker_list(&self) -> Vec<String> {
        self.brokers
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn client_id_or<'a>(&'a self, service_name: &'a str) -> &'a str {
        self.client_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(service_name)
    }

    pub fn overflow_dir(&self) -> PathBuf {
        self.overflow_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn partitioner(&self) -> Result<PrefixFieldPartitioner, ValidationError> {
        PrefixFieldPartitioner::parse(&self.partition_key_fields)
            .map_err(|e| ValidationError::InvalidPartitionRules(e.to_string()))
    }

    /// Validate Kafka configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.broker_list().is_empty() {
            return Err(ValidationError::MissingRequired("KAFKA__BROKERS"));
        }
        if self.buffer_max == 0 {
            return Err(ValidationError::MustBePositive("kafka.buffer_max"));
        }
        if self.buffer_warn_at > self.buffer_max {
            return Err(ValidationError::InvalidBufferThreshold);
        }
        if self.reconnect_base_ms == 0 {
            return Err(ValidationError::MustBePositive("kafka.reconnect_base_ms"));
        }
        if self.reconnect_base_ms > self.reconnect_max_ms {
            return Err(ValidationError::InvalidBackoff("Kafka"));
        }
        if self.topic_partitions <= 0 {
            return Err(ValidationError::MustBePositive("kafka.topic_partitions"));
        }
        if self.replication_factor <= 0 {
            return Err(ValidationError::MustBePositive("kafka.replication_factor"));
        }
        self.partitioner()?;
        Ok(())
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: None,
            buffer_max: default_buffer_max(),
            buffer_warn_at: default_buffer_warn_at(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            topic_partitions: default_topic_partitions(),
            replication_factor: default_replication_factor(),
            auto_create_topics: default_auto_create_topics(),
            shutdown_drain_timeout_ms: default_shutdown_drain_timeout_ms(),
            overflow_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            partition_key_fields: default_partition_key_fields(),
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_buffer_max() -> usize {
    1000
}

fn default_buffer_warn_at() -> usize {
    800
}

fn default_reconnect_base_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

fn default_topic_partitions() -> i32 {
    3
}

fn default_replication_factor() -> i32 {
    1
}

fn default_auto_create_topics() -> bool {
    true
}

fn default_shutdown_drain_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_partition_key_fields() -> String {
    DEFAULT_PARTITION_KEY_FIELDS.to_string()
}
