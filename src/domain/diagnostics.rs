//! Read-only diagnostics snapshots reported by transports.
//!
//! Nothing here is persisted; every value is recomputed on demand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::foundation::{Timestamp, ValidationError};

/// Which broker backs the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    Redis,
    Kafka,
    /// Recording bus used by tests.
    InMemory,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Redis => "redis",
            ProviderType::Kafka => "kafka",
            ProviderType::InMemory => "inmemory",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(ProviderType::Redis),
            "kafka" => Ok(ProviderType::Kafka),
            "inmemory" | "in-memory" | "memory" => Ok(ProviderType::InMemory),
            other => Err(ValidationError::invalid_format(
                "event_bus.provider",
                format!("unknown provider '{}'", other),
            )),
        }
    }
}

/// How the Redis transport moves events once it has picked a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Durable streams with consumer groups.
    Streams,
    /// Live Pub/Sub without replay.
    FanOut,
    /// In-process dispatch only.
    Local,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Streams => "streams",
            DeliveryMode::FanOut => "fan-out",
            DeliveryMode::Local => "local",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time health snapshot of a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusHealthDetail {
    pub provider: ProviderType,
    pub connected: bool,
    pub producer_connected: bool,
    pub consumer_connected: bool,
    pub pending_events: usize,
    pub subscription_count: usize,
    pub reconnect_attempts: u32,
    pub last_reconnect_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub dlq_published: u64,
    pub shutting_down: bool,
    pub delivery_mode: Option<DeliveryMode>,
    pub overflow_pending: bool,
}

impl EventBusHealthDetail {
    /// Empty snapshot for a provider; transports fill in what they track.
    pub fn for_provider(provider: ProviderType) -> Self {
        Self {
            provider,
            connected: false,
            producer_connected: false,
            consumer_connected: false,
            pending_events: 0,
            subscription_count: 0,
            reconnect_attempts: 0,
            last_reconnect_at: None,
            last_error: None,
            dlq_published: 0,
            shutting_down: false,
            delivery_mode: None,
            overflow_pending: false,
        }
    }
}

/// Counter snapshot since the transport was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusMetrics {
    pub published: u64,
    pub received: u64,
    pub publish_errors: u64,
    pub handler_errors: u64,
    pub buffered: u64,
    pub dropped: u64,
    pub overflowed: u64,
    pub replayed: u64,
    pub dlq_published: u64,
    pub buffer_warnings: u64,
    pub pending_events: usize,
}
