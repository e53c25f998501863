//! Kafka event transport.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                               │                 │
//!                            (failed)   (send failure / consumer crash)
//!                               ▼                 ▼
//!                          Reconnecting ◀─────────┘
//!                               │
//!                  (max attempts) ──▶ Disconnected, degraded
//! ```
//!
//! Publishes made while not connected go to a bounded buffer; the oldest
//! entry spills to the overflow file when it is full. Reconnecting flushes
//! the buffer, then replays the overflow file.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::buffer::PendingBuffer;
use super::overflow::OverflowLog;
use super::partition::{resolve_partition_key, PartitionKeyStrategy, PrefixFieldPartitioner};
use crate::adapters::events::backoff::ExponentialBackoff;
use crate::adapters::events::counters::TransportCounters;
use crate::adapters::events::registry::{dispatch, HandlerRegistry};
use crate::adapters::events::sync::lock;
use crate::domain::diagnostics::{EventBusHealthDetail, EventBusMetrics, ProviderType};
use crate::domain::foundation::{DomainError, ErrorCode, StandardEvent, Timestamp};
use crate::ports::{
    BrokerError, ConsumedRecord, EventHandler, EventPublisher, EventSubscriber, EventTransport,
    KafkaBroker, KafkaRecord, MetricsSink, PublishOutcome, TopicSpec,
};

pub const KAFKA_TOPIC_PREFIX: &str = "aiponge.events.";

/// Topic carrying an event type. Dead-letter types map to `<topic>.dlq`.
pub fn topic_for(event_type: &str) -> String {
    format!("{}{}", KAFKA_TOPIC_PREFIX, event_type)
}

pub fn consumer_group(service_name: &str) -> String {
    format!("aiponge-{}-group", service_name)
}

#[derive(Debug, Clone)]
pub struct KafkaTransportSettings {
    pub service_name: String,
    pub buffer_max: usize,
    pub buffer_warn_at: usize,
    pub reconnect: ExponentialBackoff,
    pub reconnect_max_attempts: u32,
    pub topic_partitions: i32,
    pub replication_factor: i32,
    pub auto_create_topics: bool,
    pub shutdown_drain_timeout: Duration,
    pub overflow_dir: PathBuf,
    pub poll_interval: Duration,
    pub partitioner: PrefixFieldPartitioner,
}

impl KafkaTransportSettings {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            buffer_max: 1000,
            buffer_warn_at: 800,
            reconnect: ExponentialBackoff::new(
                Duration::from_millis(1000),
                Duration::from_millis(30_000),
            ),
            reconnect_max_attempts: 10,
            topic_partitions: 3,
            replication_factor: 1,
            auto_create_topics: true,
            shutdown_drain_timeout: Duration::from_millis(5000),
            overflow_dir: std::env::temp_dir(),
            poll_interval: Duration::from_millis(100),
            partitioner: PrefixFieldPartitioner::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KafkaConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct KafkaLink {
    state: KafkaConnectionState,
    /// Bumped on every successful connection; run loops of older ones exit.
    generation: u64,
    reconnect_attempts: u32,
    last_reconnect_at: Option<Timestamp>,
    last_error: Option<String>,
    gave_up: bool,
}

struct PendingState {
    buffer: PendingBuffer,
    flushing: bool,
}

struct KafkaInner {
    settings: KafkaTransportSettings,
    broker: Arc<dyn KafkaBroker>,
    partitioner: Arc<dyn PartitionKeyStrategy>,
    link: Mutex<KafkaLink>,
    pending: Mutex<PendingState>,
    overflow: OverflowLog,
    ensured_topics: Mutex<HashSet<String>>,
    registry: HandlerRegistry,
    /// Run loop and the connection generation it serves.
    consumer: Mutex<Option<(u64, JoinHandle<()>)>>,
    counters: TransportCounters,
    metrics: Arc<dyn MetricsSink>,
    alive: AtomicBool,
    consuming: AtomicBool,
    reconnecting: AtomicBool,
    shutting_down: AtomicBool,
    replaying: AtomicU64,
}

/// Kafka-backed `EventTransport`. Clones share state.
#[derive(Clone)]
pub struct KafkaEventTransport {
    inner: Arc<KafkaInner>,
}

impl KafkaEventTransport {
    pub fn new(
        settings: KafkaTransportSettings,
        broker: Arc<dyn KafkaBroker>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let partitioner = Arc::new(settings.partitioner.clone());
        Self::with_partition_strategy(settings, broker, partitioner, metrics)
    }

    /// Use a custom partition key strategy instead of the configured rules.
    pub fn with_partition_strategy(
        settings: KafkaTransportSettings,
        broker: Arc<dyn KafkaBroker>,
        partitioner: Arc<dyn PartitionKeyStrategy>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let buffer = PendingBuffer::new(settings.buffer_max, settings.buffer_warn_at);
        let overflow = OverflowLog::new(&settings.overflow_dir, &settings.service_name);

        Self {
            inner: Arc::new(KafkaInner {
                settings,
                broker,
                partitioner,
                link: Mutex::new(KafkaLink {
                    state: KafkaConnectionState::Disconnected,
                    generation: 0,
                    reconnect_attempts: 0,
                    last_reconnect_at: None,
                    last_error: None,
                    gave_up: false,
                }),
                pending: Mutex::new(PendingState {
                    buffer,
                    flushing: false,
                }),
                overflow,
                ensured_topics: Mutex::new(HashSet::new()),
                registry: HandlerRegistry::new(),
                consumer: Mutex::new(None),
                counters: TransportCounters::new(),
                metrics,
                alive: AtomicBool::new(true),
                consuming: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                replaying: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> KafkaConnectionState {
        lock(&self.inner.link).state
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).buffer.len()
    }

    pub fn overflow_path(&self) -> &Path {
        self.inner.overflow.path()
    }

    /// True once the reconnect loop has exhausted its attempts.
    pub fn has_given_up(&self) -> bool {
        lock(&self.inner.link).gave_up
    }
}

impl KafkaInner {
    fn state(&self) -> KafkaConnectionState {
        lock(&self.link).state
    }

    fn is_connected(&self) -> bool {
        self.state() == KafkaConnectionState::Connected
    }

    fn generation(&self) -> u64 {
        lock(&self.link).generation
    }

    fn needs_reconnect(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.state() == KafkaConnectionState::Reconnecting
    }

    fn registered_topics(&self) -> Vec<String> {
        self.registry
            .event_types()
            .iter()
            .map(|t| topic_for(t))
            .collect()
    }

    async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError> {
        if !self.settings.auto_create_topics || lock(&self.ensured_topics).contains(topic) {
            return Ok(());
        }
        self.broker
            .ensure_topic(&TopicSpec {
                name: topic.to_string(),
                partitions: self.settings.topic_partitions,
                replication_factor: self.settings.replication_factor,
            })
            .await?;
        lock(&self.ensured_topics).insert(topic.to_string());
        debug!(topic, "Kafka topic ensured");
        Ok(())
    }

    fn record_for(&self, event: &StandardEvent) -> Result<KafkaRecord, BrokerError> {
        Ok(KafkaRecord {
            topic: topic_for(&event.event_type),
            key: resolve_partition_key(self.partitioner.as_ref(), event),
            payload: event.to_json()?,
            headers: vec![
                ("source".to_string(), event.source.clone()),
                ("eventType".to_string(), event.event_type.clone()),
                ("version".to_string(), event.version.clone()),
            ],
        })
    }

    /// A topic deleted behind our back is recreated and the send retried once.
    async fn send(&self, event: &StandardEvent) -> Result<(), BrokerError> {
        let record = self.record_for(event)?;
        self.ensure_topic(&record.topic).await?;
        let started = Instant::now();
        match self.broker.send(record.clone()).await {
            Err(BrokerError::UnknownTopic(detail)) => {
                warn!(topic = %record.topic, detail = %detail, "Kafka topic missing; recreating");
                lock(&self.ensured_topics).remove(&record.topic);
                self.ensure_topic(&record.topic).await?;
                self.broker.send(record).await?;
            }
            sent => sent?,
        }
        TransportCounters::incr(&self.counters.published);
        self.metrics
            .event_published(&event.event_type, started.elapsed());
        Ok(())
    }

    fn record_drop(&self, event: &StandardEvent, error: &BrokerError) {
        TransportCounters::incr(&self.counters.publish_errors);
        TransportCounters::incr(&self.counters.dropped);
        self.metrics.publish_failed(&event.event_type);
        error!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            error = %error,
            "Kafka rejected event"
        );
    }

    async fn spill(&self, event: StandardEvent) {
        match self.overflow.append(&event).await {
            Ok(()) => {
                TransportCounters::incr(&self.counters.overflowed);
                debug!(
                    event_id = %event.event_id,
                    path = %self.overflow.path().display(),
                    "Pending buffer full; oldest event written to overflow file"
                );
            }
            Err(e) => {
                TransportCounters::incr(&self.counters.dropped);
                error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Overflow write failed; event dropped"
                );
            }
        }
    }

    async fn buffer(&self, event: StandardEvent) -> PublishOutcome {
        let pushed = lock(&self.pending).buffer.push(event);
        TransportCounters::incr(&self.counters.buffered);
        self.metrics.pending_depth(pushed.depth);

        if pushed.reached_warning {
            TransportCounters::incr(&self.counters.buffer_warnings);
            warn!(
                pending = pushed.depth,
                warn_at = self.settings.buffer_warn_at,
                capacity = self.settings.buffer_max,
                "Kafka pending buffer is filling up"
            );
        }
        if let Some(evicted) = pushed.evicted {
            self.spill(evicted).await;
        }
        PublishOutcome::Buffered
    }

    /// True when the event has to queue behind buffered events.
    fn must_queue(&self) -> bool {
        let pending = lock(&self.pending);
        pending.flushing || !pending.buffer.is_empty()
    }

    async fn deliver(&self, record: ConsumedRecord) {
        TransportCounters::incr(&self.counters.received);

        let Some(payload) = record.payload else {
            warn!(topic = %record.topic, offset = record.offset, "Kafka record has no value; skipping");
            return;
        };
        let event = match StandardEvent::from_json_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Malformed Kafka record skipped"
                );
                return;
            }
        };

        self.metrics.event_received(&event.event_type);
        let handlers = self.registry.handlers_for(&event.event_type);
        for failure in dispatch(&event, &handlers).await {
            TransportCounters::incr(&self.counters.handler_errors);
            self.metrics
                .handler_failed(&event.event_type, failure.handler);
        }
    }

    fn stop_consumer(&self) {
        if let Some((_, handle)) = lock(&self.consumer).take() {
            handle.abort();
        }
    }
}

/// Publish through the live producer, or buffer.
fn publish_event(inner: Arc<KafkaInner>, mut event: StandardEvent) -> BoxFuture<'static, PublishOutcome> {
    async move {
        inner.counters.assign_sequence(&mut event);

        if !inner.is_connected() || inner.must_queue() {
            return inner.buffer(event).await;
        }

        let generation = inner.generation();
        match inner.send(&event).await {
            Ok(()) => PublishOutcome::Delivered,
            Err(e) if e.is_connection_loss() => {
                mark_disconnected(&inner, e, Some(generation));
                inner.buffer(event).await
            }
            Err(e) => {
                inner.record_drop(&event, &e);
                PublishOutcome::Dropped
            }
        }
    }
    .boxed()
}

/// Flush the memory buffer, then replay the overflow file.
fn flush_pending(inner: Arc<KafkaInner>) -> BoxFuture<'static, ()> {
    async move {
        {
            let mut pending = lock(&inner.pending);
            if pending.flushing {
                return;
            }
            pending.flushing = true;
        }

        let mut flushed = 0usize;
        loop {
            let next = {
                let mut pending = lock(&inner.pending);
                match pending.buffer.pop_front() {
                    Some(event) => event,
                    None => {
                        pending.flushing = false;
                        break;
                    }
                }
            };

            let generation = inner.generation();
            let result = if inner.is_connected() {
                inner.send(&next).await
            } else {
                Err(BrokerError::Unavailable("not connected".to_string()))
            };

            match result {
                Ok(()) => flushed += 1,
                Err(e) if e.is_connection_loss() => {
                    let refused = {
                        let mut pending = lock(&inner.pending);
                        pending.flushing = false;
                        pending.buffer.push_front(next)
                    };
                    if let Some(event) = refused {
                        inner.spill(event).await;
                    }
                    mark_disconnected(&inner, e, Some(generation));
                    return;
                }
                Err(e) => inner.record_drop(&next, &e),
            }
        }

        if flushed > 0 {
            info!(flushed, "Flushed buffered events to Kafka");
        }
        inner.metrics.pending_depth(lock(&inner.pending).buffer.len());

        if !inner.is_connected() {
            return;
        }
        let replay = match inner.overflow.take_all().await {
            Ok(events) => events,
            Err(e) => {
                error!(
                    path = %inner.overflow.path().display(),
                    error = %e,
                    "Failed to read overflow file"
                );
                return;
            }
        };
        if replay.is_empty() {
            return;
        }

        let total = replay.len();
        inner.replaying.store(total as u64, Ordering::SeqCst);
        for event in replay {
            publish_event(inner.clone(), event).await;
            TransportCounters::incr(&inner.counters.replayed);
            inner.replaying.fetch_sub(1, Ordering::SeqCst);
        }
        info!(replayed = total, "Replayed overflow file");
    }
    .boxed()
}

async fn on_connected(inner: &Arc<KafkaInner>) {
    let generation = {
        let mut link = lock(&inner.link);
        link.state = KafkaConnectionState::Connected;
        link.generation += 1;
        link.reconnect_attempts = 0;
        link.gave_up = false;
        link.generation
    };
    inner.metrics.connection_changed(ProviderType::Kafka, true);
    info!(generation, "Kafka transport connected");

    if inner.consuming.load(Ordering::SeqCst) {
        match resubscribe(inner).await {
            Ok(()) => spawn_run_loop(inner, generation),
            Err(e) if e.is_connection_loss() => {
                mark_disconnected(inner, e, Some(generation));
                return;
            }
            Err(e) => error!(error = %e, "Failed to restore Kafka subscriptions"),
        }
    }

    flush_pending(inner.clone()).await;
}

/// Connected → Reconnecting, then start the reconnect loop.
///
/// Ignored when `generation` belongs to an older connection.
fn mark_disconnected(inner: &Arc<KafkaInner>, error: BrokerError, generation: Option<u64>) {
    {
        let mut link = lock(&inner.link);
        if link.state != KafkaConnectionState::Connected {
            return;
        }
        if generation.is_some_and(|g| g != link.generation) {
            return;
        }
        link.state = KafkaConnectionState::Reconnecting;
        link.last_error = Some(error.to_string());
    }
    inner.stop_consumer();

    warn!(error = %error, "Kafka connection lost; buffering publishes until reconnected");
    inner.metrics.connection_changed(ProviderType::Kafka, false);

    if inner.alive.load(Ordering::SeqCst) {
        tokio::spawn(reconnect_loop(inner.clone()));
    }
}

/// Exponential backoff; gives up after `reconnect_max_attempts`.
fn reconnect_loop(inner: Arc<KafkaInner>) -> BoxFuture<'static, ()> {
    async move {
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        loop {
            let mut attempt: u32 = 0;
            while inner.needs_reconnect() {
                attempt = attempt.saturating_add(1);
                if attempt > inner.settings.reconnect_max_attempts {
                    {
                        let mut link = lock(&inner.link);
                        link.state = KafkaConnectionState::Disconnected;
                        link.gave_up = true;
                    }
                    error!(
                        attempts = inner.settings.reconnect_max_attempts,
                        "Giving up on Kafka; events stay buffered"
                    );
                    break;
                }

                let delay = inner.settings.reconnect.delay_for(attempt);
                {
                    let mut link = lock(&inner.link);
                    link.reconnect_attempts = attempt;
                    link.last_reconnect_at = Some(Timestamp::now());
                }
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling Kafka reconnect"
                );
                tokio::time::sleep(delay).await;

                if !inner.needs_reconnect() {
                    break;
                }
                match inner.broker.connect().await {
                    Ok(()) => {
                        info!(attempt, "Kafka reconnected");
                        on_connected(&inner).await;
                    }
                    Err(e) => {
                        lock(&inner.link).last_error = Some(e.to_string());
                        warn!(attempt, error = %e, "Kafka reconnect attempt failed");
                    }
                }
            }

            inner.reconnecting.store(false, Ordering::SeqCst);
            if !inner.needs_reconnect() || inner.reconnecting.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }
    .boxed()
}

/// Point the consumer at every registered topic.
async fn resubscribe(inner: &Arc<KafkaInner>) -> Result<(), BrokerError> {
    let topics = inner.registered_topics();
    for topic in &topics {
        if let Err(e) = inner.ensure_topic(topic).await {
            if e.is_connection_loss() {
                return Err(e);
            }
            warn!(topic = %topic, error = %e, "Could not ensure Kafka topic");
        }
    }
    inner.broker.subscribe(&topics).await?;
    debug!(topics = topics.len(), "Kafka consumer subscribed");
    Ok(())
}

fn spawn_run_loop(inner: &Arc<KafkaInner>, generation: u64) {
    let mut consumer = lock(&inner.consumer);
    if let Some((running, handle)) = consumer.as_ref() {
        if *running == generation && !handle.is_finished() {
            return;
        }
        handle.abort();
    }
    *consumer = Some((
        generation,
        tokio::spawn(run_loop(inner.clone(), generation)),
    ));
}

fn run_loop(inner: Arc<KafkaInner>, generation: u64) -> BoxFuture<'static, ()> {
    async move {
        loop {
            if !inner.alive.load(Ordering::SeqCst)
                || !inner.consuming.load(Ordering::SeqCst)
                || inner.generation() != generation
                || !inner.is_connected()
            {
                return;
            }

            match inner.broker.poll(inner.settings.poll_interval).await {
                Ok(Some(record)) => inner.deliver(record).await,
                Ok(None) => {}
                Err(e) if e.is_connection_loss() => {
                    error!(error = %e, "Kafka consumer crashed");
                    mark_disconnected(&inner, e, Some(generation));
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Kafka poll failed");
                    tokio::time::sleep(inner.settings.poll_interval).await;
                }
            }
        }
    }
    .boxed()
}

/// Publish buffered events one at a time until `deadline`; anything left,
/// including a send cut short by the deadline, stays buffered and is lost.
async fn drain_for_shutdown(inner: &Arc<KafkaInner>, deadline: tokio::time::Instant) {
    loop {
        let Some(event) = lock(&inner.pending).buffer.pop_front() else {
            return;
        };
        match tokio::time::timeout_at(deadline, inner.send(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if !e.is_connection_loss() => inner.record_drop(&event, &e),
            Ok(Err(_)) | Err(_) => {
                if let Some(refused) = lock(&inner.pending).buffer.push_front(event) {
                    warn!(event_id = %refused.event_id, "Buffer refilled during shutdown; event lost");
                    TransportCounters::incr(&inner.counters.dropped);
                }
                if tokio::time::Instant::now() >= deadline {
                    debug!("Kafka shutdown drain timed out");
                }
                return;
            }
        }
    }
}

fn subscription_error(event_type: &str, error: BrokerError) -> DomainError {
    DomainError::new(
        ErrorCode::SubscriptionFailed,
        format!("Kafka subscription for '{}' failed: {}", event_type, error),
    )
    .with_detail("topic", topic_for(event_type))
}

#[async_trait]
impl EventPublisher for KafkaEventTransport {
    async fn publish(&self, event: StandardEvent) -> PublishOutcome {
        publish_event(self.inner.clone(), event).await
    }
}

#[async_trait]
impl EventSubscriber for KafkaEventTransport {
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DomainError> {
        let inner = &self.inner;
        if !inner.registry.add(event_type, handler.clone()) {
            return Ok(());
        }
        if !inner.consuming.load(Ordering::SeqCst) || !inner.is_connected() {
            debug!(event_type, "Kafka subscription registered");
            return Ok(());
        }

        let generation = inner.generation();
        match resubscribe(inner).await {
            Ok(()) => {
                spawn_run_loop(inner, generation);
                Ok(())
            }
            Err(e) if e.is_connection_loss() => {
                mark_disconnected(inner, e, Some(generation));
                Ok(())
            }
            Err(e) => {
                inner.registry.remove(event_type, Some(&handler));
                Err(subscription_error(event_type, e))
            }
        }
    }

    async fn unsubscribe(&self, event_type: &str, handler: Option<Arc<dyn EventHandler>>) {
        let inner = &self.inner;
        if !inner.registry.remove(event_type, handler.as_ref()) {
            return;
        }
        if inner.consuming.load(Ordering::SeqCst) && inner.is_connected() {
            if let Err(e) = resubscribe(inner).await {
                warn!(event_type, error = %e, "Failed to update Kafka subscription");
            }
        }
        debug!(event_type, "Kafka subscription removed");
    }

    async fn start_consuming(&self) -> Result<(), DomainError> {
        let inner = &self.inner;
        inner.consuming.store(true, Ordering::SeqCst);
        if !inner.is_connected() {
            debug!("Kafka consumer starts once connected");
            return Ok(());
        }

        let generation = inner.generation();
        match resubscribe(inner).await {
            Ok(()) => {
                spawn_run_loop(inner, generation);
                info!(
                    group = %consumer_group(&inner.settings.service_name),
                    topics = inner.registry.subscription_count(),
                    "Kafka consumer running"
                );
                Ok(())
            }
            Err(e) if e.is_connection_loss() => {
                mark_disconnected(inner, e, Some(generation));
                Ok(())
            }
            Err(e) => Err(DomainError::new(
                ErrorCode::SubscriptionFailed,
                format!("Kafka consumer could not subscribe: {}", e),
            )),
        }
    }
}

#[async_trait]
impl EventTransport for KafkaEventTransport {
    async fn connect(&self) {
        let inner = &self.inner;
        {
            let mut link = lock(&inner.link);
            if link.state != KafkaConnectionState::Disconnected {
                return;
            }
            link.state = KafkaConnectionState::Connecting;
        }

        match inner.broker.connect().await {
            Ok(()) => on_connected(inner).await,
            Err(e) => {
                {
                    let mut link = lock(&inner.link);
                    link.state = KafkaConnectionState::Reconnecting;
                    link.last_error = Some(e.to_string());
                }
                warn!(error = %e, "Kafka unreachable; buffering publishes while reconnecting");
                inner.metrics.connection_changed(ProviderType::Kafka, false);
                tokio::spawn(reconnect_loop(inner.clone()));
            }
        }
    }

    fn supports_dead_letter(&self) -> bool {
        true
    }

    async fn publish_to_dlq(
        &self,
        event: &StandardEvent,
        error: &DomainError,
    ) -> Result<(), DomainError> {
        let dead_letter = event
            .to_dead_letter(&error.message, Timestamp::now())
            .map_err(|e| {
                DomainError::new(ErrorCode::SerializationFailed, e.to_string())
                    .with_detail("event_id", event.event_id.as_str())
            })?;
        let dlq_type = dead_letter.event_type.clone();

        let outcome = publish_event(self.inner.clone(), dead_letter).await;
        if !outcome.is_accepted() {
            return Err(DomainError::new(
                ErrorCode::PublishRejected,
                format!("dead letter for '{}' was dropped", event.event_type),
            )
            .with_detail("event_id", event.event_id.as_str()));
        }

        TransportCounters::incr(&self.inner.counters.dlq_published);
        self.inner.metrics.dead_lettered(&event.event_type);
        warn!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            topic = %topic_for(&dlq_type),
            error = %error,
            "Event dead-lettered"
        );
        Ok(())
    }

    async fn disconnect(&self) {
        let inner = &self.inner;
        inner.alive.store(false, Ordering::SeqCst);
        inner.consuming.store(false, Ordering::SeqCst);
        inner.stop_consumer();
        inner.broker.disconnect().await;
        lock(&inner.link).state = KafkaConnectionState::Disconnected;
        inner.metrics.connection_changed(ProviderType::Kafka, false);
        info!("Kafka transport disconnected");
    }

    async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::SeqCst);
        inner.consuming.store(false, Ordering::SeqCst);
        inner.stop_consumer();

        if inner.is_connected() {
            let deadline = tokio::time::Instant::now() + inner.settings.shutdown_drain_timeout;
            drain_for_shutdown(inner, deadline).await;
        }

        let lost = lock(&inner.pending).buffer.len();
        if lost > 0 {
            warn!(lost, "Shutting down with undelivered Kafka events");
        }
        self.disconnect().await;
    }

    fn connection_status(&self) -> bool {
        self.inner.is_connected()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Kafka
    }

    fn metrics(&self) -> EventBusMetrics {
        self.inner.counters.snapshot(self.pending_len())
    }

    fn health_detail(&self) -> EventBusHealthDetail {
        let inner = &self.inner;
        let pending_events = self.pending_len();
        let consumer_running = lock(&inner.consumer)
            .as_ref()
            .is_some_and(|(_, h)| !h.is_finished());
        let link = lock(&inner.link);
        let connected = link.state == KafkaConnectionState::Connected;

        EventBusHealthDetail {
            connected,
            producer_connected: connected,
            consumer_connected: connected && consumer_running,
            pending_events,
            subscription_count: inner.registry.subscription_count(),
            reconnect_attempts: link.reconnect_attempts,
            last_reconnect_at: link.last_reconnect_at,
            last_error: link.last_error.clone(),
            dlq_published: inner.counters.dlq_published.load(Ordering::Relaxed),
            shutting_down: inner.shutting_down.load(Ordering::SeqCst),
            overflow_pending: inner.overflow.pending() > 0
                || inner.replaying.load(Ordering::SeqCst) > 0,
            ..EventBusHealthDetail::for_provider(ProviderType::Kafka)
        }
    }
}
