//! Integration tests for the Kafka transport.
//!
//! These tests drive `KafkaEventTransport` against the in-memory broker:
//! 1. Records carry the prefixed topic, partition key and routing headers
//! 2. Publishes buffer while the broker is away, spill to the overflow file
//!    when the buffer is full, and replay once it returns
//! 3. A crashed consumer reconnects and resubscribes to every topic
//! 4. Reconnecting stops after the configured number of attempts

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aiponge_event_bus::adapters::events::{ExponentialBackoff, NoopMetricsSink};
use aiponge_event_bus::adapters::kafka::{
    topic_for, InMemoryKafkaBroker, KafkaConnectionState, KafkaEventTransport,
    KafkaTransportSettings,
};
use aiponge_event_bus::domain::foundation::{DomainError, StandardEvent};
use aiponge_event_bus::ports::{
    EventHandler, EventPublisher, EventSubscriber, EventTransport, PublishOutcome,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct RecordingHandler {
    seen: Mutex<Vec<StandardEvent>>,
}

impl RecordingHandler {
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
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: StandardEvent) -> Result<(), DomainError> {
        self.seen.lock().unwrap().push(event);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RecordingHandler"
    }
}

fn settings(overflow_dir: &Path) -> KafkaTransportSettings {
    KafkaTransportSettings {
        reconnect: ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(50)),
        reconnect_max_attempts: 50,
        poll_interval: Duration::from_millis(10),
        shutdown_drain_timeout: Duration::from_millis(200),
        overflow_dir: overflow_dir.to_path_buf(),
        ..KafkaTransportSettings::new("music-service")
    }
}

fn transport(settings: KafkaTransportSettings, broker: &InMemoryKafkaBroker) -> KafkaEventTransport {
    KafkaEventTransport::new(settings, Arc::new(broker.clone()), Arc::new(NoopMetricsSink))
}

fn event(event_type: &str, n: u32) -> StandardEvent {
    StandardEvent::from_json(event_type, "music-service", json!({ "n": n }))
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
// Producing
// =============================================================================

#[tokio::test]
async fn records_carry_topic_key_and_headers() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    transport.connect().await;

    let outcome = transport
        .publish(event("track.played", 1).with_correlation_id("req-1"))
        .await;

    assert_eq!(outcome, PublishOutcome::Delivered);
    let records = broker.sent_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].topic, "aiponge.events.track.played");
    assert_eq!(records[0].key, "req-1");
    assert_eq!(records[0].header("source"), Some("music-service"));
    assert_eq!(records[0].header("eventType"), Some("track.played"));
    assert_eq!(records[0].header("version"), Some("1.0"));

    let spec = broker.topic("aiponge.events.track.played").unwrap();
    assert_eq!(spec.partitions, 3);
    assert_eq!(spec.replication_factor, 1);
}

#[tokio::test]
async fn analytics_events_are_keyed_by_user() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    transport.connect().await;

    let batch = StandardEvent::from_json(
        "analytics.events.batch",
        "music-service",
        json!({ "userId": "user-9", "events": [] }),
    );
    transport.publish(batch).await;

    assert_eq!(broker.sent_records()[0].key, "user-9");
}

#[tokio::test]
async fn topics_are_ensured_once() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    transport.connect().await;

    for n in 0..3 {
        transport.publish(event("track.played", n)).await;
    }

    assert_eq!(broker.topic_requests(), 1);
    assert_eq!(broker.sent_records().len(), 3);
}

#[tokio::test]
async fn topic_creation_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(
        KafkaTransportSettings {
            auto_create_topics: false,
            ..settings(dir.path())
        },
        &broker,
    );
    transport.connect().await;

    transport.publish(event("track.played", 1)).await;

    assert_eq!(broker.topic_requests(), 0);
    assert_eq!(broker.sent_records().len(), 1);
}

#[tokio::test]
async fn rejected_records_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    transport.connect().await;
    broker.reject_topic(&topic_for("track.played"));

    let outcome = transport.publish(event("track.played", 1)).await;

    assert_eq!(outcome, PublishOutcome::Dropped);
    let metrics = transport.metrics();
    assert_eq!(metrics.dropped, 1);
    assert_eq!(metrics.publish_errors, 1);
    assert!(transport.connection_status());
}

#[tokio::test]
async fn deleted_topic_is_recreated_and_the_send_retried() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    let topic = topic_for("track.played");
    transport.connect().await;
    transport.publish(event("track.played", 1)).await;

    broker.delete_topic(&topic);
    let outcome = transport.publish(event("track.played", 2)).await;

    assert_eq!(outcome, PublishOutcome::Delivered);
    assert_eq!(broker.sent_events(&topic).len(), 2);
    assert_eq!(broker.topic_requests(), 2);
    assert!(broker.topic(&topic).is_some());
    assert_eq!(transport.metrics().dropped, 0);
}

#[tokio::test]
async fn buffered_events_survive_a_deleted_topic() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    let topic = topic_for("track.played");
    transport.connect().await;
    transport.publish(event("track.played", 1)).await;

    broker.set_available(false);
    assert_eq!(
        transport.publish(event("track.played", 2)).await,
        PublishOutcome::Buffered
    );
    broker.delete_topic(&topic);
    broker.set_available(true);

    assert!(wait_until(|| broker.sent_events(&topic).len() == 2).await);
    assert_eq!(transport.pending_len(), 0);
    assert_eq!(transport.metrics().dropped, 0);

    transport.shutdown().await;
}

#[tokio::test]
async fn dead_letters_go_to_the_dlq_topic_with_the_original_key() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    transport.connect().await;
    let original = event("track.played", 1).with_correlation_id("req-7");

    transport
        .publish_to_dlq(&original, &DomainError::handler("boom"))
        .await
        .unwrap();

    let record = broker.sent_records().pop().unwrap();
    assert_eq!(record.topic, "aiponge.events.track.played.dlq");
    assert_eq!(record.key, "req-7");
    assert_eq!(record.header("eventType"), Some("track.played.dlq"));

    let dead_letter = StandardEvent::from_json_str(&record.payload).unwrap();
    assert_eq!(dead_letter.event_id, original.event_id);
    assert_eq!(dead_letter.data_field("error").as_deref(), Some("boom"));
    assert_eq!(
        dead_letter.dead_letter_original().map(|e| e.event_id),
        Some(original.event_id)
    );
    assert_eq!(transport.health_detail().dlq_published, 1);
}

// =============================================================================
// Buffering and overflow
// =============================================================================

#[tokio::test]
async fn buffer_warning_fires_once_per_fill() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::unavailable();
    let transport = transport(
        KafkaTransportSettings {
            buffer_max: 10,
            buffer_warn_at: 5,
            ..settings(dir.path())
        },
        &broker,
    );
    transport.connect().await;

    for n in 0..8 {
        assert_eq!(
            transport.publish(event("track.played", n)).await,
            PublishOutcome::Buffered
        );
    }

    assert_eq!(transport.pending_len(), 8);
    assert_eq!(transport.metrics().buffer_warnings, 1);
    assert!(!transport.overflow_path().exists());
}

#[tokio::test]
async fn overflow_spills_to_file_and_replays_after_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::unavailable();
    let transport = transport(
        KafkaTransportSettings {
            buffer_max: 3,
            buffer_warn_at: 2,
            ..settings(dir.path())
        },
        &broker,
    );
    transport.connect().await;

    let published: Vec<StandardEvent> = (0..5).map(|n| event("track.played", n)).collect();
    for e in &published {
        transport.publish(e.clone()).await;
    }

    assert_eq!(transport.pending_len(), 3);
    assert!(transport.overflow_path().exists());
    assert_eq!(transport.metrics().overflowed, 2);
    assert!(transport.health_detail().overflow_pending);

    broker.set_available(true);
    let topic = topic_for("track.played");
    assert!(wait_until(|| broker.sent_events(&topic).len() == 5).await);
    assert!(wait_until(|| !transport.overflow_path().exists()).await);

    let mut sent: Vec<_> = broker
        .sent_events(&topic)
        .into_iter()
        .map(|e| e.event_id.as_str().to_string())
        .collect();
    let mut expected: Vec<_> = published
        .iter()
        .map(|e| e.event_id.as_str().to_string())
        .collect();
    sent.sort();
    expected.sort();
    assert_eq!(sent, expected);

    assert!(wait_until(|| transport.metrics().replayed == 2).await);
    assert!(wait_until(|| !transport.health_detail().overflow_pending).await);
}

#[tokio::test]
async fn buffered_events_flush_in_order_on_connect() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::unavailable();
    let transport = transport(settings(dir.path()), &broker);
    transport.connect().await;
    assert_eq!(transport.state(), KafkaConnectionState::Reconnecting);

    let published: Vec<StandardEvent> = (0..4).map(|n| event("track.played", n)).collect();
    for e in &published {
        transport.publish(e.clone()).await;
    }

    broker.set_available(true);
    assert!(wait_until(|| transport.pending_len() == 0).await);

    let sent: Vec<_> = broker
        .sent_events(&topic_for("track.played"))
        .into_iter()
        .map(|e| e.event_id)
        .collect();
    let expected: Vec<_> = published.into_iter().map(|e| e.event_id).collect();
    assert_eq!(sent, expected);
    assert_eq!(transport.state(), KafkaConnectionState::Connected);
}

// =============================================================================
// Consuming and reconnecting
// =============================================================================

#[tokio::test]
async fn consumed_events_reach_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    let handler = RecordingHandler::new();
    transport.subscribe("track.played", handler.clone()).await.unwrap();
    transport.connect().await;
    transport.start_consuming().await.unwrap();

    transport.publish(event("track.played", 1)).await;

    assert!(wait_until(|| handler.seen().len() == 1).await);
    assert!(transport.health_detail().consumer_connected);

    transport.shutdown().await;
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    let handler = RecordingHandler::new();
    transport.subscribe("track.played", handler.clone()).await.unwrap();
    transport.connect().await;
    transport.start_consuming().await.unwrap();

    let topic = topic_for("track.played");
    broker.inject(&topic, Some("{ broken"));
    broker.inject(&topic, None);
    transport.publish(event("track.played", 1)).await;

    assert!(wait_until(|| handler.seen().len() == 1).await);
    assert_eq!(transport.metrics().received, 3);

    transport.shutdown().await;
}

#[tokio::test]
async fn crashed_consumer_reconnects_and_resubscribes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::new();
    let transport = transport(settings(dir.path()), &broker);
    let played = RecordingHandler::new();
    let liked = RecordingHandler::new();
    transport.subscribe("track.played", played.clone()).await.unwrap();
    transport.subscribe("track.liked", liked.clone()).await.unwrap();
    transport.connect().await;
    transport.start_consuming().await.unwrap();
    assert_eq!(broker.subscribe_calls().len(), 1);

    broker.crash_consumer();

    assert!(wait_until(|| broker.subscribe_calls().len() == 2).await);
    assert!(wait_until(|| transport.state() == KafkaConnectionState::Connected).await);

    let mut topics = broker.subscribe_calls().pop().unwrap();
    topics.sort();
    assert_eq!(
        topics,
        vec![topic_for("track.liked"), topic_for("track.played")]
    );

    let detail = transport.health_detail();
    assert_eq!(detail.reconnect_attempts, 0);
    assert!(detail.last_reconnect_at.is_some());
    assert!(detail.last_error.is_some());

    transport.publish(event("track.liked", 1)).await;
    assert!(wait_until(|| liked.seen().len() == 1).await);

    transport.shutdown().await;
}

#[tokio::test]
async fn reconnecting_gives_up_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::unavailable();
    let transport = transport(
        KafkaTransportSettings {
            reconnect: ExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(5)),
            reconnect_max_attempts: 2,
            ..settings(dir.path())
        },
        &broker,
    );
    transport.connect().await;

    assert!(wait_until(|| transport.has_given_up()).await);
    assert_eq!(transport.state(), KafkaConnectionState::Disconnected);
    assert_eq!(broker.connect_calls(), 3);
    assert_eq!(
        transport.publish(event("track.played", 1)).await,
        PublishOutcome::Buffered
    );

    broker.set_available(true);
    transport.connect().await;

    assert_eq!(transport.state(), KafkaConnectionState::Connected);
    assert!(!transport.has_given_up());
    assert_eq!(broker.sent_records().len(), 1);
}

#[tokio::test]
async fn shutdown_while_disconnected_keeps_nothing_running() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::unavailable();
    let transport = transport(settings(dir.path()), &broker);
    transport.connect().await;
    transport.publish(event("track.played", 1)).await;

    transport.shutdown().await;

    let detail = transport.health_detail();
    assert!(detail.shutting_down);
    assert!(!detail.connected);
    assert_eq!(detail.pending_events, 1);
    assert_eq!(transport.state(), KafkaConnectionState::Disconnected);
}

#[tokio::test]
async fn shutdown_drains_buffered_events() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::unavailable();
    let settings = KafkaTransportSettings {
        shutdown_drain_timeout: Duration::from_secs(2),
        ..settings(dir.path())
    };
    let transport = transport(settings, &broker);
    transport.connect().await;
    for n in 1..=5 {
        transport.publish(event("track.played", n)).await;
    }

    broker.set_send_delay(Duration::from_millis(30));
    broker.set_available(true);
    assert!(wait_until(|| transport.state() == KafkaConnectionState::Connected).await);
    transport.shutdown().await;

    assert_eq!(transport.pending_len(), 0);
    let topic = topic_for("track.played");
    assert!(wait_until(|| broker.sent_events(&topic).len() == 5).await);
}

#[tokio::test]
async fn shutdown_drain_timeout_leaves_the_rest_buffered() {
    let dir = tempfile::tempdir().unwrap();
    let broker = InMemoryKafkaBroker::unavailable();
    let settings = KafkaTransportSettings {
        shutdown_drain_timeout: Duration::from_millis(150),
        ..settings(dir.path())
    };
    let transport = transport(settings, &broker);
    transport.connect().await;
    for n in 1..=6 {
        transport.publish(event("track.played", n)).await;
    }

    broker.set_send_delay(Duration::from_millis(100));
    broker.set_available(true);
    assert!(wait_until(|| transport.state() == KafkaConnectionState::Connected).await);
    transport.shutdown().await;

    assert!(transport.pending_len() > 0);
    assert_eq!(transport.state(), KafkaConnectionState::Disconnected);

    // A send cut short by the deadline is still counted.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let sent = broker.sent_events(&topic_for("track.played")).len();
    assert_eq!(sent + transport.pending_len(), 6);
}
