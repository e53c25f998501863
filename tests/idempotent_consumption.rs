//! Integration tests for idempotent consumption.
//!
//! These tests verify the end-to-end flow:
//! 1. A handler registered through `IdempotentSubscriber` runs once per event id,
//!    however many times a transport redelivers it
//! 2. Deduplication is per handler: two handlers each see the event once
//! 3. A handler that keeps failing is retried, recorded as failed and
//!    dead-lettered when the transport has a dead-letter destination
//!
//! Uses the in-memory brokers so no external services are needed.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aiponge_event_bus::adapters::events::{
    ExponentialBackoff, IdempotentSubscriber, InMemoryEventBus, InMemoryProcessedEventCache,
    NoopMetricsSink, SubscriptionOptions,
};
use aiponge_event_bus::adapters::kafka::{
    topic_for, InMemoryKafkaBroker, KafkaEventTransport, KafkaTransportSettings,
};
use aiponge_event_bus::adapters::redis::{
    stream_key, InMemoryRedisServer, RedisEventTransport, RedisTransportSettings,
};
use aiponge_event_bus::application::EventBusClient;
use aiponge_event_bus::domain::foundation::{DomainError, StandardEvent};
use aiponge_event_bus::ports::{
    EventHandler, EventPublisher, EventSubscriber, EventTransport, PublishOutcome,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// Counts calls; optionally fails every one of them.
struct CountingHandler {
    name: &'static str,
    calls: AtomicUsize,
    always_fail: bool,
}

impl CountingHandler {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            always_fail: false,
        })
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            always_fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _event: StandardEvent) -> Result<(), DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(DomainError::handler("downstream unavailable"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Fails until its failure budget is spent.
struct FlakyHandler {
    failures: AtomicUsize,
}

#[async_trait]
impl EventHandler for FlakyHandler {
    async fn handle(&self, _event: StandardEvent) -> Result<(), DomainError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DomainError::handler("flaky"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FlakyHandler"
    }
}

fn cache() -> Arc<InMemoryProcessedEventCache> {
    Arc::new(InMemoryProcessedEventCache::new(1000, Duration::from_secs(60)))
}

fn quick_retries(max_retries: u32) -> SubscriptionOptions {
    SubscriptionOptions {
        max_retries,
        retry_delay: Duration::from_millis(1),
    }
}

fn kafka(broker: &InMemoryKafkaBroker, dir: &std::path::Path) -> Arc<KafkaEventTransport> {
    let settings = KafkaTransportSettings {
        reconnect: ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(50)),
        poll_interval: Duration::from_millis(10),
        overflow_dir: dir.to_path_buf(),
        ..KafkaTransportSettings::new("analytics-service")
    };
    Arc::new(KafkaEventTransport::new(
        settings,
        Arc::new(broker.clone()),
        Arc::new(NoopMetricsSink),
    ))
}

fn played() -> StandardEvent {
    StandardEvent::from_json("track.played", "music-service", json!({ "trackId": "t-1" }))
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test]
async fn redelivered_event_is_handled_once() {
    let bus = Arc::new(InMemoryEventBus::new());
    let subscriber = IdempotentSubscriber::new(bus.clone(), cache());
    let handler = CountingHandler::new("PlayCounter");
    subscriber.subscribe("track.played", handler.clone()).await.unwrap();

    let event = played();
    bus.publish(event.clone()).await;
    bus.deliver(event.clone()).await;
    bus.deliver(event).await;

    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn deduplication_is_scoped_per_handler() {
    let bus = Arc::new(InMemoryEventBus::new());
    let subscriber = IdempotentSubscriber::new(bus.clone(), cache());
    let counter = CountingHandler::new("PlayCounter");
    let recommender = CountingHandler::new("Recommender");
    subscriber.subscribe("track.played", counter.clone()).await.unwrap();
    subscriber.subscribe("track.played", recommender.clone()).await.unwrap();

    let event = played();
    bus.publish(event.clone()).await;
    bus.deliver(event).await;

    assert_eq!(counter.calls(), 1);
    assert_eq!(recommender.calls(), 1);
}

#[tokio::test]
async fn redis_stream_duplicates_are_handled_once() {
    let server = InMemoryRedisServer::new(7);
    let settings = RedisTransportSettings {
        block: Duration::from_millis(50),
        ..RedisTransportSettings::new("analytics-service")
    };
    let transport = Arc::new(RedisEventTransport::new(
        settings,
        Some(server.connector()),
        Arc::new(NoopMetricsSink),
    ));
    let subscriber = IdempotentSubscriber::new(transport.clone(), cache());
    let handler = CountingHandler::new("PlayCounter");
    transport.connect().await;
    subscriber.subscribe("track.played", handler.clone()).await.unwrap();

    let event = played();
    transport.publish(event.clone()).await;
    transport.publish(event).await;

    let key = stream_key("track.played");
    assert!(wait_until(|| transport.metrics().received == 2).await);
    assert!(wait_until(|| server.pending_count(&key, "analytics-service") == 0).await);
    assert_eq!(server.stream_payloads(&key).len(), 2);
    assert_eq!(handler.calls(), 1);

    transport.shutdown().await;
}

#[tokio::test]
async fn kafka_redelivery_is_handled_once() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = kafka(&broker, dir.path());
    let subscriber = IdempotentSubscriber::new(transport.clone(), cache());
    let handler = CountingHandler::new("PlayCounter");
    subscriber.subscribe("track.played", handler.clone()).await.unwrap();
    transport.connect().await;
    transport.start_consuming().await.unwrap();

    let event = played();
    transport.publish(event.clone()).await;
    let payload = event.to_json().unwrap();
    broker.inject(&topic_for("track.played"), Some(&payload));

    assert!(wait_until(|| transport.metrics().received == 2).await);
    assert_eq!(handler.calls(), 1);

    transport.shutdown().await;
}

// =============================================================================
// Retry and dead-lettering
// =============================================================================

#[tokio::test]
async fn exhausted_handler_is_dead_lettered_on_kafka() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = kafka(&broker, dir.path());
    let processed = cache();
    let subscriber = IdempotentSubscriber::new(transport.clone(), processed.clone());
    let handler = CountingHandler::failing("Scrobbler");
    subscriber
        .subscribe_with("track.played", handler.clone(), quick_retries(2))
        .await
        .unwrap();
    transport.connect().await;
    transport.start_consuming().await.unwrap();

    let event = played().with_correlation_id("req-3");
    transport.publish(event.clone()).await;

    let dlq = topic_for("track.played.dlq");
    assert!(wait_until(|| broker.sent_events(&dlq).len() == 1).await);
    assert_eq!(handler.calls(), 3);
    assert_eq!(processed.outcome(&event.event_id, "Scrobbler"), Some(false));

    let dead_letter = broker.sent_events(&dlq).remove(0);
    assert_eq!(dead_letter.event_id, event.event_id);
    assert_eq!(
        dead_letter.data_field("error").as_deref(),
        Some("downstream unavailable")
    );
    let record = broker
        .sent_records()
        .into_iter()
        .find(|r| r.topic == dlq)
        .unwrap();
    assert_eq!(record.key, "req-3");
    assert_eq!(transport.health_detail().dlq_published, 1);

    // A redelivery of the failed event is not retried again.
    broker.inject(&topic_for("track.played"), Some(&event.to_json().unwrap()));
    assert!(wait_until(|| transport.metrics().received == 2).await);
    assert_eq!(handler.calls(), 3);

    transport.shutdown().await;
}

#[tokio::test]
async fn without_dead_letter_support_the_error_reaches_the_transport() {
    let bus = Arc::new(InMemoryEventBus::without_dead_letter());
    let processed = cache();
    let subscriber = IdempotentSubscriber::new(bus.clone(), processed.clone());
    let handler = CountingHandler::failing("Scrobbler");
    subscriber
        .subscribe_with("track.played", handler.clone(), quick_retries(1))
        .await
        .unwrap();

    let event = played();
    let errors = bus.deliver(event.clone()).await;

    assert_eq!(errors.len(), 1);
    assert_eq!(handler.calls(), 2);
    assert_eq!(processed.outcome(&event.event_id, "Scrobbler"), Some(false));
    assert!(bus.dead_letters().is_empty());
}

#[tokio::test]
async fn recovering_handler_is_not_dead_lettered() {
    let bus = Arc::new(InMemoryEventBus::new());
    let subscriber = IdempotentSubscriber::new(bus.clone(), cache());
    let flaky = Arc::new(FlakyHandler {
        failures: AtomicUsize::new(2),
    });
    subscriber
        .subscribe_with("track.played", flaky.clone(), quick_retries(3))
        .await
        .unwrap();

    bus.publish(played()).await;

    assert!(bus.dead_letters().is_empty());
    assert_eq!(flaky.failures.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Through the client
// =============================================================================

#[tokio::test]
async fn client_subscriptions_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = kafka(&broker, dir.path());
    let client = EventBusClient::new(
        "analytics-service",
        transport.clone(),
        cache(),
        quick_retries(0),
    );
    let handler = CountingHandler::new("PlayCounter");
    client.subscribe("track.played", handler.clone()).await.unwrap();
    client.start().await;
    client.start_consuming().await.unwrap();

    let event = client.new_event("track.played", json!({ "trackId": "t-2" }));
    client.publish(event.clone()).await;
    broker.inject(&topic_for("track.played"), Some(&event.to_json().unwrap()));

    assert!(wait_until(|| client.metrics().received == 2).await);
    assert_eq!(handler.calls(), 1);
    assert_eq!(event.source, "analytics-service");

    let registered: Arc<dyn EventHandler> = handler.clone();
    client.unsubscribe("track.played", Some(registered)).await;
    assert_eq!(client.health_detail().subscription_count, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn failing_local_handler_does_not_hold_up_publish() {
    let transport = Arc::new(RedisEventTransport::local_only(
        "music-service",
        Arc::new(NoopMetricsSink),
    ));
    let client = EventBusClient::new(
        "music-service",
        transport,
        cache(),
        SubscriptionOptions {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        },
    );
    let handler = CountingHandler::failing("Scrobbler");
    client.subscribe("track.played", handler.clone()).await.unwrap();
    client.start().await;

    let started = std::time::Instant::now();
    let outcome = client
        .publish_event("track.played", json!({ "trackId": "t-1" }), None)
        .await;

    assert_eq!(outcome, PublishOutcome::LocallyDispatched);
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(wait_until(|| handler.calls() == 1).await);
}
