//! EventBusClient - The per-process event bus instance.
//!
//! Built once at service startup and passed to whoever needs it. Producers
//! should depend on `EventPublisher` only; consumers register through
//! `subscribe`, which always goes through the idempotent layer.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::events::{
    create_event_transport, IdempotentSubscriber, InMemoryProcessedEventCache,
    SubscriptionOptions,
};
use crate::config::AppConfig;
use crate::domain::diagnostics::{EventBusHealthDetail, EventBusMetrics, ProviderType};
use crate::domain::foundation::{DomainError, StandardEvent};
use crate::ports::{
    EventHandler, EventPublisher, EventTransport, MetricsSink, ProcessedEventStore,
    PublishOutcome,
};

pub struct EventBusClient {
    service_name: String,
    transport: Arc<dyn EventTransport>,
    subscriber: IdempotentSubscriber,
}

impl EventBusClient {
    pub fn new(
        service_name: impl Into<String>,
        transport: Arc<dyn EventTransport>,
        processed_events: Arc<dyn ProcessedEventStore>,
        defaults: SubscriptionOptions,
    ) -> Self {
        let subscriber =
            IdempotentSubscriber::new(transport.clone(), processed_events).with_defaults(defaults);
        Self {
            service_name: service_name.into(),
            transport,
            subscriber,
        }
    }

    /// Build the configured transport and an in-memory processed-event cache.
    pub fn from_config(
        config: &AppConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, DomainError> {
        let transport = create_event_transport(config, metrics)?;
        let processed_events = Arc::new(InMemoryProcessedEventCache::new(
            config.subscriber.processed_cache_max,
            config.subscriber.processed_ttl(),
        ));
        let defaults = SubscriptionOptions {
            max_retries: config.subscriber.max_retries,
            retry_delay: config.subscriber.retry_delay(),
        };
        Ok(Self::new(
            config.service.name.clone(),
            transport,
            processed_events,
            defaults,
        ))
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn transport(&self) -> &Arc<dyn EventTransport> {
        &self.transport
    }

    /// New envelope sourced from this service, with fresh ids.
    pub fn new_event(&self, event_type: &str, data: JsonValue) -> StandardEvent {
        StandardEvent::from_json(event_type, self.service_name.as_str(), data)
    }

    /// Build and publish an event, propagating `correlation_id` when given.
    pub async fn publish_event(
        &self,
        event_type: &str,
        data: JsonValue,
        correlation_id: Option<&str>,
    ) -> PublishOutcome {
        let mut event = self.new_event(event_type, data);
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        self.publish(event).await
    }

    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DomainError> {
        self.subscriber.subscribe(event_type, handler).await
    }

    pub async fn subscribe_with(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscriptionOptions,
    ) -> Result<(), DomainError> {
        self.subscriber
            .subscribe_with(event_type, handler, options)
            .await
    }

    pub async fn unsubscribe(&self, event_type: &str, handler: Option<Arc<dyn EventHandler>>) {
        self.subscriber.unsubscribe(event_type, handler).await
    }

    /// Connect the transport. Never fails; see `health_detail` for state.
    pub async fn start(&self) {
        info!(
            service = %self.service_name,
            provider = %self.transport.provider_type(),
            "Starting event bus"
        );
        self.transport.connect().await;
    }

    pub async fn start_consuming(&self) -> Result<(), DomainError> {
        self.transport.start_consuming().await
    }

    /// Drain what can be drained, then disconnect.
    pub async fn shutdown(&self) {
        info!(service = %self.service_name, "Shutting down event bus");
        self.transport.shutdown().await;
    }

    pub fn connection_status(&self) -> bool {
        self.transport.connection_status()
    }

    pub fn provider_type(&self) -> ProviderType {
        self.transport.provider_type()
    }

    pub fn health_detail(&self) -> EventBusHealthDetail {
        self.transport.health_detail()
    }

    pub fn metrics(&self) -> EventBusMetrics {
        self.transport.metrics()
    }
}

#[async_trait::async_trait]
impl EventPublisher for EventBusClient {
    /// Invalid envelopes are logged and dropped instead of reaching a broker.
    async fn publish(&self, event: StandardEvent) -> PublishOutcome {
        if let Err(e) = event.validate() {
            warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                error = %e,
                "Refusing to publish invalid event"
            );
            return PublishOutcome::Dropped;
        }
        self.transport.publish(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::{InMemoryEventBus, NoopMetricsSink};
    use crate::domain::foundation::ErrorCode;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recording {
        seen: Mutex<Vec<StandardEvent>>,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<StandardEvent> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for Recording {
        async fn handle(&self, event: StandardEvent) -> Result<(), DomainError> {
            self.seen.lock().unwrap().push(event);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Recording"
        }
    }

    fn client() -> (Arc<InMemoryEventBus>, EventBusClient) {
        let bus = Arc::new(InMemoryEventBus::new());
        let cache = Arc::new(InMemoryProcessedEventCache::new(100, Duration::from_secs(60)));
        let client = EventBusClient::new(
            "music-service",
            bus.clone(),
            cache,
            SubscriptionOptions::default(),
        );
        (bus, client)
    }

    #[test]
    fn new_event_is_sourced_from_service() {
        let (_, client) = client();
        let event = client.new_event("track.played", json!({"trackId": "t-1"}));

        assert_eq!(event.source, "music-service");
        assert_eq!(event.event_type, "track.played");
        assert_eq!(event.data_field("trackId").as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn publish_event_propagates_correlation_id() {
        let (bus, client) = client();
        let handler = Recording::new();
        client.subscribe("track.played", handler.clone()).await.unwrap();

        let outcome = client
            .publish_event("track.played", json!({}), Some("req-42"))
            .await;

        assert_eq!(outcome, PublishOutcome::LocallyDispatched);
        assert_eq!(handler.seen()[0].correlation_id, "req-42");
        assert_eq!(bus.event_count(), 1);
    }

    #[tokio::test]
    async fn invalid_events_are_dropped() {
        let (bus, client) = client();

        let outcome = client.publish_event("bad type", json!({}), None).await;

        assert_eq!(outcome, PublishOutcome::Dropped);
        assert_eq!(bus.event_count(), 0);
    }

    #[tokio::test]
    async fn from_config_uses_local_redis_by_default() {
        let client =
            EventBusClient::from_config(&AppConfig::default(), Arc::new(NoopMetricsSink)).unwrap();
        client.start().await;

        assert_eq!(client.provider_type(), ProviderType::Redis);
        assert!(client.connection_status());
        assert_eq!(client.service_name(), "aiponge-service");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn from_config_surfaces_factory_errors() {
        let mut config = AppConfig::default();
        config.event_bus.provider = ProviderType::Kafka;
        config.kafka.partition_key_fields = "broken".to_string();

        let err = EventBusClient::from_config(&config, Arc::new(NoopMetricsSink))
            .err()
            .unwrap();

        assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    }
}
