//! Transport selection.
//!
//! One provider per deployment, chosen by `event_bus.provider`. There is no
//! fallback from one provider to another and nothing here retries.

use std::sync::Arc;
use tracing::{info, warn};

use super::backoff::ExponentialBackoff;
use super::in_memory::InMemoryEventBus;
use crate::adapters::kafka::{KafkaEventTransport, KafkaTransportSettings};
use crate::adapters::redis::{
    default_consumer_name, RedisClientConnector, RedisEventTransport, RedisTransportSettings,
};
use crate::config::{AppConfig, KafkaConfig, RedisConfig};
use crate::domain::diagnostics::ProviderType;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{EventTransport, KafkaBroker, MetricsSink, RedisConnector};

/// Build the transport for the configured provider. Does not connect.
pub fn create_event_transport(
    config: &AppConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Arc<dyn EventTransport>, DomainError> {
    match config.event_bus.provider {
        ProviderType::Redis => Ok(Arc::new(create_redis_transport(config, metrics))),
        ProviderType::Kafka => create_kafka_transport(config, metrics),
        ProviderType::InMemory => {
            info!("Using the in-process event bus");
            Ok(Arc::new(InMemoryEventBus::new()))
        }
    }
}

pub fn redis_transport_settings(service_name: &str, config: &RedisConfig) -> RedisTransportSettings {
    RedisTransportSettings {
        service_name: service_name.to_string(),
        consumer_name: config
            .consumer_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_consumer_name(service_name)),
        stream_max_len: config.stream_max_len,
        batch_size: config.batch_size,
        block: config.block(),
        poll_interval: config.poll_interval(),
        reconnect: ExponentialBackoff::new(config.reconnect_base(), config.reconnect_max()),
        shutdown_drain_timeout: config.shutdown_drain_timeout(),
        local_dispatch_wait: config.local_dispatch_wait(),
    }
}

/// Redis transport; local-only when the URL is missing or malformed.
pub fn create_redis_transport(
    config: &AppConfig,
    metrics: Arc<dyn MetricsSink>,
) -> RedisEventTransport {
    let settings = redis_transport_settings(&config.service.name, &config.redis);
    let connector: Option<Arc<dyn RedisConnector>> = match config.redis.configured_url() {
        None => None,
        Some(url) => match RedisClientConnector::new(url) {
            Ok(connector) => Some(Arc::new(connector)),
            Err(e) => {
                warn!(error = %e, "Malformed Redis URL; events are delivered in-process only");
                None
            }
        },
    };
    RedisEventTransport::new(settings, connector, metrics)
}

pub fn kafka_transport_settings(
    service_name: &str,
    config: &KafkaConfig,
) -> Result<KafkaTransportSettings, DomainError> {
    let partitioner = config.partitioner().map_err(|e| {
        DomainError::new(ErrorCode::InvalidConfiguration, e.to_string())
            .with_detail("field", "kafka.partition_key_fields")
    })?;

    Ok(KafkaTransportSettings {
        service_name: service_name.to_string(),
        buffer_max: config.buffer_max,
        buffer_warn_at: config.buffer_warn_at,
        reconnect: ExponentialBackoff::new(config.reconnect_base(), config.reconnect_max()),
        reconnect_max_attempts: config.reconnect_max_attempts,
        topic_partitions: config.topic_partitions,
        replication_factor: config.replication_factor,
        auto_create_topics: config.auto_create_topics,
        shutdown_drain_timeout: config.shutdown_drain_timeout(),
        overflow_dir: config.overflow_dir(),
        poll_interval: config.poll_interval(),
        partitioner,
    })
}

/// Kafka transport over an explicit broker client.
pub fn create_kafka_transport_with(
    config: &AppConfig,
    broker: Arc<dyn KafkaBroker>,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Arc<dyn EventTransport>, DomainError> {
    let settings = kafka_transport_settings(&config.service.name, &config.kafka)?;
    Ok(Arc::new(KafkaEventTransport::new(settings, broker, metrics)))
}

#[cfg(feature = "kafka")]
fn create_kafka_transport(
    config: &AppConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Arc<dyn EventTransport>, DomainError> {
    use crate::adapters::kafka::{consumer_group, RdKafkaBroker, RdKafkaSettings};

    let service = &config.service.name;
    let broker = RdKafkaBroker::new(RdKafkaSettings {
        brokers: config.kafka.broker_list().join(","),
        client_id: config.kafka.client_id_or(service).to_string(),
        group_id: consumer_group(service),
        send_timeout: config.kafka.send_timeout(),
        metadata_timeout: config.kafka.send_timeout(),
    });
    create_kafka_transport_with(config, Arc::new(broker), metrics)
}

#[cfg(not(feature = "kafka"))]
fn create_kafka_transport(
    _config: &AppConfig,
    _metrics: Arc<dyn MetricsSink>,
) -> Result<Arc<dyn EventTransport>, DomainError> {
    Err(DomainError::new(
        ErrorCode::InvalidConfiguration,
        "Kafka provider selected but this build lacks the `kafka` feature",
    )
    .with_detail("field", "event_bus.provider"))
}
