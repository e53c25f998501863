//! Redis event transport.
//!
//! Connection state machine:
//!
//! ```text
//! Uninitialized ──connect──▶ Connecting ──ok──▶ Ready ◀──reconnect──┐
//!       │                        │                 │                 │
//!   (no URL)                 (failed)        (connection lost)       │
//!       ▼                        ▼                 ▼                 │
//!   LocalOnly               LocalOnly ─────▶ Disconnected ───────────┘
//! ```
//!
//! The delivery mode is fixed on the first `Ready`: streams with consumer
//! groups when the server is 5.x or newer, plain Pub/Sub fan-out otherwise.
//! While `LocalOnly` the transport still reports itself connected and
//! publishes straight to handlers registered in this process.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::events::backoff::ExponentialBackoff;
use crate::adapters::events::counters::TransportCounters;
use crate::adapters::events::registry::{dispatch, HandlerRegistry};
use crate::adapters::events::sync::lock;
use crate::domain::diagnostics::{
    DeliveryMode, EventBusHealthDetail, EventBusMetrics, ProviderType,
};
use crate::domain::foundation::{DomainError, ErrorCode, StandardEvent, Timestamp};
use crate::ports::{
    BrokerError, EventHandler, EventPublisher, EventSubscriber, EventTransport, GroupStart,
    MetricsSink, PublishOutcome, RedisBroker, RedisConnector, StreamEntry, StreamStart,
};

/// Prefix shared by stream keys and Pub/Sub channels.
pub const REDIS_KEY_PREFIX: &str = "aiponge:events:";

/// Stream key and channel name for an event type.
pub fn stream_key(event_type: &str) -> String {
    format!("{}{}", REDIS_KEY_PREFIX, event_type)
}

/// Default consumer name: `<service>-<HOSTNAME|local>`.
pub fn default_consumer_name(service_name: &str) -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "local".to_string());
    format!("{}-{}", service_name, host)
}

/// Tunables for the Redis transport.
#[derive(Debug, Clone)]
pub struct RedisTransportSettings {
    /// Also the consumer group name.
    pub service_name: String,
    pub consumer_name: String,
    pub stream_max_len: usize,
    pub batch_size: usize,
    pub block: Duration,
    pub poll_interval: Duration,
    pub reconnect: ExponentialBackoff,
    pub shutdown_drain_timeout: Duration,
    /// Local-only publishes wait this long for handlers, then return while
    /// the dispatch carries on in the background.
    pub local_dispatch_wait: Duration,
}

impl RedisTransportSettings {
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        Self {
            consumer_name: default_consumer_name(&service_name),
            service_name,
            stream_max_len: 10_000,
            batch_size: 10,
            block: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(1000),
            reconnect: ExponentialBackoff::new(
                Duration::from_millis(500),
                Duration::from_millis(30_000),
            ),
            shutdown_drain_timeout: Duration::from_millis(5000),
            local_dispatch_wait: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisConnectionPhase {
    Uninitialized,
    Connecting,
    Ready,
    LocalOnly,
    Disconnected,
}

struct LinkState {
    phase: RedisConnectionPhase,
    broker: Option<Arc<dyn RedisBroker>>,
    /// Chosen once, on the first `Ready`.
    mode: Option<DeliveryMode>,
    /// Bumped on every successful connection; workers of older generations exit.
    generation: u64,
    workers: HashMap<String, JoinHandle<()>>,
    reconnect_attempts: u32,
    last_reconnect_at: Option<Timestamp>,
    last_error: Option<String>,
}

#[derive(Clone)]
struct Link {
    phase: RedisConnectionPhase,
    broker: Option<Arc<dyn RedisBroker>>,
    mode: Option<DeliveryMode>,
    generation: u64,
}

#[derive(Default)]
struct PendingQueue {
    events: VecDeque<StandardEvent>,
    /// Set while a flush owns the queue; publishers append behind it.
    flushing: bool,
}

struct RedisInner {
    settings: RedisTransportSettings,
    connector: Option<Arc<dyn RedisConnector>>,
    link: Mutex<LinkState>,
    registry: HandlerRegistry,
    pending: Mutex<PendingQueue>,
    counters: TransportCounters,
    metrics: Arc<dyn MetricsSink>,
    alive: AtomicBool,
    reconnecting: AtomicBool,
    shutting_down: AtomicBool,
}

/// Redis-backed `EventTransport`.
///
/// Cheap to clone; clones share the same connection and registry.
#[derive(Clone)]
pub struct RedisEventTransport {
    inner: Arc<RedisInner>,
}

impl RedisEventTransport {
    /// Create a transport. `None` for the connector means no broker is
    /// configured and the transport runs local-only.
    pub fn new(
        settings: RedisTransportSettings,
        connector: Option<Arc<dyn RedisConnector>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let phase = if connector.is_some() {
            RedisConnectionPhase::Uninitialized
        } else {
            RedisConnectionPhase::LocalOnly
        };
        let mode = connector.is_none().then_some(DeliveryMode::Local);

        Self {
            inner: Arc::new(RedisInner {
                settings,
                connector,
                link: Mutex::new(LinkState {
                    phase,
                    broker: None,
                    mode,
                    generation: 0,
                    workers: HashMap::new(),
                    reconnect_attempts: 0,
                    last_reconnect_at: None,
                    last_error: None,
                }),
                registry: HandlerRegistry::new(),
                pending: Mutex::new(PendingQueue::default()),
                counters: TransportCounters::new(),
                metrics,
                alive: AtomicBool::new(true),
                reconnecting: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Local-only transport: no broker, in-process delivery.
    pub fn local_only(service_name: impl Into<String>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::new(RedisTransportSettings::new(service_name), None, metrics)
    }

    pub fn phase(&self) -> RedisConnectionPhase {
        lock(&self.inner.link).phase
    }

    pub fn delivery_mode(&self) -> Option<DeliveryMode> {
        let link = lock(&self.inner.link);
        match link.phase {
            RedisConnectionPhase::LocalOnly => Some(DeliveryMode::Local),
            _ => link.mode,
        }
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).events.len()
    }
}

impl RedisInner {
    fn link(&self) -> Link {
        let state = lock(&self.link);
        Link {
            phase: state.phase,
            broker: state.broker.clone(),
            mode: state.mode,
            generation: state.generation,
        }
    }

    fn group(&self) -> &str {
        &self.settings.service_name
    }

    /// True while a worker for `event_type` started in `generation` should keep going.
    fn worker_active(&self, event_type: &str, generation: u64) -> bool {
        if !self.alive.load(Ordering::SeqCst) || !self.registry.contains(event_type) {
            return false;
        }
        let state = lock(&self.link);
        state.phase == RedisConnectionPhase::Ready && state.generation == generation
    }

    fn needs_reconnect(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) || self.connector.is_none() {
            return false;
        }
        matches!(
            lock(&self.link).phase,
            RedisConnectionPhase::LocalOnly | RedisConnectionPhase::Disconnected
        )
    }

    fn enqueue(&self, event: StandardEvent) -> PublishOutcome {
        let depth = {
            let mut queue = lock(&self.pending);
            queue.events.push_back(event);
            queue.events.len()
        };
        TransportCounters::incr(&self.counters.buffered);
        self.metrics.pending_depth(depth);
        debug!(pending = depth, "Redis unavailable; event queued");
        PublishOutcome::Buffered
    }

    /// Queue behind an in-progress flush so publish order is preserved.
    fn enqueue_if_flushing(&self, event: StandardEvent) -> Result<PublishOutcome, StandardEvent> {
        let depth = {
            let mut queue = lock(&self.pending);
            if !queue.flushing && queue.events.is_empty() {
                return Err(event);
            }
            queue.events.push_back(event);
            queue.events.len()
        };
        TransportCounters::incr(&self.counters.buffered);
        self.metrics.pending_depth(depth);
        Ok(PublishOutcome::Buffered)
    }

    async fn send(
        &self,
        broker: &Arc<dyn RedisBroker>,
        mode: DeliveryMode,
        event: &StandardEvent,
    ) -> Result<(), BrokerError> {
        let payload = event.to_json()?;
        let key = stream_key(&event.event_type);
        let started = Instant::now();
        match mode {
            DeliveryMode::Streams => {
                broker
                    .xadd(&key, self.settings.stream_max_len, &payload)
                    .await?;
            }
            DeliveryMode::FanOut => broker.publish(&key, &payload).await?,
            DeliveryMode::Local => {}
        }
        TransportCounters::incr(&self.counters.published);
        self.metrics
            .event_published(&event.event_type, started.elapsed());
        Ok(())
    }

    async fn dispatch_locally(&self, event: &StandardEvent) {
        let handlers = self.registry.handlers_for(&event.event_type);
        TransportCounters::incr(&self.counters.received);
        self.metrics.event_received(&event.event_type);
        for failure in dispatch(event, &handlers).await {
            TransportCounters::incr(&self.counters.handler_errors);
            self.metrics
                .handler_failed(&event.event_type, failure.handler);
        }
    }
}

/// Drains the pending queue through the live connection, oldest first.
///
/// On connection loss, or when a send outlives `deadline`, the unsent event
/// goes back to the front.
async fn flush_pending(inner: &Arc<RedisInner>, deadline: Option<tokio::time::Instant>) {
    {
        let mut queue = lock(&inner.pending);
        if queue.flushing || queue.events.is_empty() {
            return;
        }
        queue.flushing = true;
    }

    let mut flushed = 0usize;
    loop {
        let next = {
            let mut queue = lock(&inner.pending);
            match queue.events.pop_front() {
                Some(event) => event,
                None => {
                    queue.flushing = false;
                    break;
                }
            }
        };

        let link = inner.link();
        let (RedisConnectionPhase::Ready, Some(broker), Some(mode)) =
            (link.phase, link.broker, link.mode)
        else {
            let mut queue = lock(&inner.pending);
            queue.events.push_front(next);
            queue.flushing = false;
            break;
        };

        let sent = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, inner.send(&broker, mode, &next))
                .await
                .ok(),
            None => Some(inner.send(&broker, mode, &next).await),
        };
        let Some(sent) = sent else {
            let mut queue = lock(&inner.pending);
            queue.events.push_front(next);
            queue.flushing = false;
            break;
        };

        match sent {
            Ok(()) => flushed += 1,
            Err(e) if e.is_connection_loss() => {
                {
                    let mut queue = lock(&inner.pending);
                    queue.events.push_front(next);
                    queue.flushing = false;
                }
                mark_disconnected(inner, e, Some(link.generation));
                break;
            }
            Err(e) => {
                TransportCounters::incr(&inner.counters.publish_errors);
                TransportCounters::incr(&inner.counters.dropped);
                inner.metrics.publish_failed(&next.event_type);
                error!(
                    event_id = %next.event_id,
                    event_type = %next.event_type,
                    error = %e,
                    "Failed to publish queued event"
                );
            }
        }
    }

    let remaining = lock(&inner.pending).events.len();
    inner.metrics.pending_depth(remaining);
    if flushed > 0 {
        info!(flushed, remaining, "Flushed queued events to Redis");
    }
}

/// Connect, pick the delivery mode, restore subscriptions, flush the queue.
async fn establish(inner: &Arc<RedisInner>) -> Result<(), BrokerError> {
    let Some(connector) = inner.connector.clone() else {
        return Ok(());
    };

    let broker = connector.connect().await?;

    let known_mode = lock(&inner.link).mode.filter(|m| *m != DeliveryMode::Local);
    let mode = match known_mode {
        Some(mode) => mode,
        None => match broker.server_major_version().await {
            Ok(Some(major)) if major >= 5 => DeliveryMode::Streams,
            Ok(Some(major)) => {
                info!(major, "Redis server predates streams; using Pub/Sub fan-out");
                DeliveryMode::FanOut
            }
            Ok(None) => {
                warn!("Could not determine Redis version; using Pub/Sub fan-out");
                DeliveryMode::FanOut
            }
            Err(e) if e.is_connection_loss() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Redis version query failed; using Pub/Sub fan-out");
                DeliveryMode::FanOut
            }
        },
    };

    let generation = {
        let mut state = lock(&inner.link);
        for (_, handle) in state.workers.drain() {
            handle.abort();
        }
        state.phase = RedisConnectionPhase::Ready;
        state.broker = Some(broker.clone());
        state.mode = Some(mode);
        state.generation += 1;
        state.reconnect_attempts = 0;
        state.generation
    };
    inner.metrics.connection_changed(ProviderType::Redis, true);
    info!(mode = %mode, generation, "Redis transport ready");

    for event_type in inner.registry.event_types() {
        if let Err(e) = start_worker(inner, &event_type, &broker, mode, generation).await {
            if e.is_connection_loss() {
                mark_disconnected(inner, e, Some(generation));
                return Ok(());
            }
            error!(event_type = %event_type, error = %e, "Failed to restore Redis subscription");
        }
    }

    flush_pending(inner, None).await;
    Ok(())
}

/// Transition Ready → Disconnected and start reconnecting.
///
/// Ignored when `generation` belongs to an older connection.
fn mark_disconnected(inner: &Arc<RedisInner>, error: BrokerError, generation: Option<u64>) {
    let broker = {
        let mut state = lock(&inner.link);
        if state.phase != RedisConnectionPhase::Ready {
            return;
        }
        if generation.is_some_and(|g| g != state.generation) {
            return;
        }
        state.phase = RedisConnectionPhase::Disconnected;
        state.last_error = Some(error.to_string());
        for (_, handle) in state.workers.drain() {
            handle.abort();
        }
        state.broker.take()
    };

    warn!(error = %error, "Redis connection lost; queuing publishes until reconnected");
    inner.metrics.connection_changed(ProviderType::Redis, false);

    if let Some(broker) = broker {
        tokio::spawn(async move { broker.close().await });
    }
    if inner.alive.load(Ordering::SeqCst) {
        tokio::spawn(reconnect_loop(inner.clone()));
    }
}

/// Background reconnect with exponential backoff and no attempt limit.
fn reconnect_loop(inner: Arc<RedisInner>) -> BoxFuture<'static, ()> {
    async move {
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        loop {
            let mut attempt: u32 = 0;
            while inner.needs_reconnect() {
                attempt = attempt.saturating_add(1);
                let delay = inner.settings.reconnect.delay_for(attempt);
                {
                    let mut state = lock(&inner.link);
                    state.reconnect_attempts = attempt;
                    state.last_reconnect_at = Some(Timestamp::now());
                }
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling Redis reconnect"
                );
                tokio::time::sleep(delay).await;

                if !inner.needs_reconnect() {
                    break;
                }
                match establish(&inner).await {
                    Ok(()) => info!(attempt, "Redis reconnected"),
                    Err(e) => {
                        lock(&inner.link).last_error = Some(e.to_string());
                        warn!(attempt, error = %e, "Redis reconnect attempt failed");
                    }
                }
            }

            inner.reconnecting.store(false, Ordering::SeqCst);
            // A drop between the last check and the flag reset would otherwise be missed.
            if !inner.needs_reconnect() || inner.reconnecting.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }
    .boxed()
}

/// Join the group (streams) or open the channel subscription (fan-out) and
/// spawn the worker for one event type.
async fn start_worker(
    inner: &Arc<RedisInner>,
    event_type: &str,
    broker: &Arc<dyn RedisBroker>,
    mode: DeliveryMode,
    generation: u64,
) -> Result<(), BrokerError> {
    let key = stream_key(event_type);
    let task = match mode {
        DeliveryMode::Streams => {
            broker
                .xgroup_create(&key, inner.group(), GroupStart::Tail)
                .await?;
            stream_poller(inner.clone(), event_type.to_string(), broker.clone(), generation)
        }
        DeliveryMode::FanOut => {
            let messages = broker.subscribe(&key).await?;
            channel_listener(inner.clone(), event_type.to_string(), messages, generation)
        }
        DeliveryMode::Local => return Ok(()),
    };

    let handle = tokio::spawn(task);
    let mut state = lock(&inner.link);
    if state.generation != generation {
        handle.abort();
        return Ok(());
    }
    if let Some(previous) = state.workers.insert(event_type.to_string(), handle) {
        previous.abort();
    }
    debug!(event_type, mode = %mode, "Redis subscription active");
    Ok(())
}

/// Reads this consumer's pending entries first, then live entries.
fn stream_poller(
    inner: Arc<RedisInner>,
    event_type: String,
    broker: Arc<dyn RedisBroker>,
    generation: u64,
) -> BoxFuture<'static, ()> {
    async move {
        let key = stream_key(&event_type);
        let group = inner.settings.service_name.clone();
        let consumer = inner.settings.consumer_name.clone();
        let mut start = StreamStart::Pending("0".to_string());

        while inner.worker_active(&event_type, generation) {
            let block = match start {
                StreamStart::Pending(_) => Duration::ZERO,
                StreamStart::New => inner.settings.block,
            };

            let result = broker
                .xreadgroup(
                    &key,
                    &group,
                    &consumer,
                    &start,
                    inner.settings.batch_size,
                    block,
                )
                .await;

            match result {
                Ok(entries) => {
                    if matches!(start, StreamStart::Pending(_)) && entries.is_empty() {
                        debug!(stream = %key, "Pending entries reclaimed; switching to live reads");
                        start = StreamStart::New;
                        continue;
                    }
                    for entry in entries {
                        if let StreamStart::Pending(cursor) = &mut start {
                            cursor.clone_from(&entry.id);
                        }
                        process_entry(&inner, &broker, &key, &group, &event_type, entry).await;
                    }
                }
                Err(BrokerError::NoGroup(detail)) => {
                    // Recreated from the start of the stream so entries written while the
                    // group was gone still arrive; the idempotent layer absorbs repeats.
                    warn!(stream = %key, group = %group, detail = %detail, "Consumer group missing; recreating");
                    if let Err(e) = broker
                        .xgroup_create(&key, &group, GroupStart::Beginning)
                        .await
                    {
                        if e.is_connection_loss() {
                            mark_disconnected(&inner, e, Some(generation));
                            return;
                        }
                        warn!(stream = %key, error = %e, "Failed to recreate consumer group");
                        tokio::time::sleep(inner.settings.poll_interval).await;
                    }
                }
                Err(e) if e.is_connection_loss() => {
                    mark_disconnected(&inner, e, Some(generation));
                    return;
                }
                Err(e) => {
                    warn!(stream = %key, error = %e, "Stream poll failed");
                    tokio::time::sleep(inner.settings.poll_interval).await;
                }
            }
        }
    }
    .boxed()
}

async fn process_entry(
    inner: &Arc<RedisInner>,
    broker: &Arc<dyn RedisBroker>,
    key: &str,
    group: &str,
    event_type: &str,
    entry: StreamEntry,
) {
    TransportCounters::incr(&inner.counters.received);
    inner.metrics.event_received(event_type);

    let parsed = entry
        .payload
        .as_deref()
        .map(StandardEvent::from_json_str);

    let acknowledge = match parsed {
        None => {
            warn!(stream = %key, entry_id = %entry.id, "Stream entry has no payload; acknowledging");
            true
        }
        Some(Err(e)) => {
            warn!(stream = %key, entry_id = %entry.id, error = %e, "Malformed stream entry; acknowledging");
            true
        }
        Some(Ok(event)) => {
            let handlers = inner.registry.handlers_for(event_type);
            let failures = dispatch(&event, &handlers).await;
            for failure in &failures {
                TransportCounters::incr(&inner.counters.handler_errors);
                inner.metrics.handler_failed(event_type, failure.handler);
            }
            if !failures.is_empty() {
                debug!(
                    stream = %key,
                    entry_id = %entry.id,
                    event_id = %event.event_id,
                    "Entry left pending after handler failure"
                );
            }
            failures.is_empty()
        }
    };

    if acknowledge {
        if let Err(e) = broker.xack(key, group, &entry.id).await {
            warn!(stream = %key, entry_id = %entry.id, error = %e, "XACK failed");
        }
    }
}

/// Delivers live Pub/Sub messages until the subscription connection closes.
fn channel_listener(
    inner: Arc<RedisInner>,
    event_type: String,
    mut messages: BoxStream<'static, String>,
    generation: u64,
) -> BoxFuture<'static, ()> {
    async move {
        while let Some(payload) = messages.next().await {
            if !inner.worker_active(&event_type, generation) {
                return;
            }
            match StandardEvent::from_json_str(&payload) {
                Ok(event) => inner.dispatch_locally(&event).await,
                Err(e) => warn!(
                    channel = %stream_key(&event_type),
                    error = %e,
                    "Malformed Pub/Sub message dropped"
                ),
            }
        }

        if inner.worker_active(&event_type, generation) {
            mark_disconnected(
                &inner,
                BrokerError::Unavailable("subscription connection closed".to_string()),
                Some(generation),
            );
        }
    }
    .boxed()
}

/// Flush until the queue is empty or `deadline` passes, waiting out a flush
/// that is already running.
async fn drain_for_shutdown(inner: &Arc<RedisInner>, deadline: tokio::time::Instant) {
    loop {
        let (empty, flushing) = {
            let queue = lock(&inner.pending);
            (queue.events.is_empty(), queue.flushing)
        };
        if empty && !flushing {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            debug!("Redis shutdown drain timed out");
            return;
        }
        if flushing {
            let pause = inner.settings.poll_interval.min(Duration::from_millis(10));
            tokio::time::sleep_until(deadline.min(tokio::time::Instant::now() + pause)).await;
            continue;
        }
        flush_pending(inner, Some(deadline)).await;
        if inner.link().phase != RedisConnectionPhase::Ready {
            return;
        }
    }
}

#[async_trait]
impl EventPublisher for RedisEventTransport {
    async fn publish(&self, mut event: StandardEvent) -> PublishOutcome {
        let inner = &self.inner;
        inner.counters.assign_sequence(&mut event);

        let link = inner.link();
        match link.phase {
            RedisConnectionPhase::LocalOnly => {
                TransportCounters::incr(&inner.counters.published);
                let dispatching = {
                    let inner = inner.clone();
                    tokio::spawn(async move { inner.dispatch_locally(&event).await })
                };
                if tokio::time::timeout(inner.settings.local_dispatch_wait, dispatching)
                    .await
                    .is_err()
                {
                    debug!("Local handlers still running; publish returns without them");
                }
                PublishOutcome::LocallyDispatched
            }
            RedisConnectionPhase::Ready => {
                let event = match inner.enqueue_if_flushing(event) {
                    Ok(outcome) => return outcome,
                    Err(event) => event,
                };
                let (Some(broker), Some(mode)) = (link.broker, link.mode) else {
                    return inner.enqueue(event);
                };
                match inner.send(&broker, mode, &event).await {
                    Ok(()) => PublishOutcome::Delivered,
                    Err(e) if e.is_connection_loss() => {
                        mark_disconnected(inner, e, Some(link.generation));
                        inner.enqueue(event)
                    }
                    Err(e) => {
                        TransportCounters::incr(&inner.counters.publish_errors);
                        TransportCounters::incr(&inner.counters.dropped);
                        inner.metrics.publish_failed(&event.event_type);
                        error!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            error = %e,
                            "Redis rejected event"
                        );
                        PublishOutcome::Dropped
                    }
                }
            }
            RedisConnectionPhase::Uninitialized
            | RedisConnectionPhase::Connecting
            | RedisConnectionPhase::Disconnected => inner.enqueue(event),
        }
    }
}

#[async_trait]
impl EventSubscriber for RedisEventTransport {
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DomainError> {
        let inner = &self.inner;
        if !inner.registry.add(event_type, handler.clone()) {
            return Ok(());
        }

        let link = inner.link();
        let (RedisConnectionPhase::Ready, Some(broker), Some(mode)) =
            (link.phase, link.broker, link.mode)
        else {
            debug!(event_type, "Subscription registered; activates once Redis is ready");
            return Ok(());
        };

        match start_worker(inner, event_type, &broker, mode, link.generation).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_loss() => {
                mark_disconnected(inner, e, Some(link.generation));
                Ok(())
            }
            Err(e) => {
                inner.registry.remove(event_type, Some(&handler));
                Err(DomainError::new(
                    ErrorCode::SubscriptionFailed,
                    format!("Redis subscription for '{}' failed: {}", event_type, e),
                )
                .with_detail("stream", stream_key(event_type)))
            }
        }
    }

    async fn unsubscribe(&self, event_type: &str, handler: Option<Arc<dyn EventHandler>>) {
        let inner = &self.inner;
        if !inner.registry.remove(event_type, handler.as_ref()) {
            return;
        }

        let (worker, mode) = {
            let mut state = lock(&inner.link);
            (state.workers.remove(event_type), state.mode)
        };
        if let Some(worker) = worker {
            worker.abort();
        }

        if mode == Some(DeliveryMode::Streams) {
            if let Some(broker) = inner.link().broker {
                let key = stream_key(event_type);
                if let Err(e) = broker
                    .xgroup_delconsumer(&key, inner.group(), &inner.settings.consumer_name)
                    .await
                {
                    warn!(stream = %key, error = %e, "Failed to leave consumer group");
                }
            }
        }
        debug!(event_type, "Redis subscription removed");
    }

    async fn start_consuming(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

#[async_trait]
impl EventTransport for RedisEventTransport {
    async fn connect(&self) {
        let inner = &self.inner;
        {
            let mut state = lock(&inner.link);
            match state.phase {
                RedisConnectionPhase::Uninitialized => {
                    state.phase = RedisConnectionPhase::Connecting;
                }
                RedisConnectionPhase::LocalOnly if inner.connector.is_none() => {
                    info!("No Redis URL configured; events are delivered in-process only");
                    inner.metrics.connection_changed(ProviderType::Redis, true);
                    return;
                }
                _ => return,
            }
        }

        if let Err(e) = establish(inner).await {
            {
                let mut state = lock(&inner.link);
                state.phase = RedisConnectionPhase::LocalOnly;
                state.last_error = Some(e.to_string());
            }
            warn!(error = %e, "Redis unreachable; running local-only while reconnecting");
            tokio::spawn(reconnect_loop(inner.clone()));
        }
    }

    async fn disconnect(&self) {
        let inner = &self.inner;
        inner.alive.store(false, Ordering::SeqCst);

        let broker = {
            let mut state = lock(&inner.link);
            for (_, handle) in state.workers.drain() {
                handle.abort();
            }
            if state.phase != RedisConnectionPhase::LocalOnly || inner.connector.is_some() {
                state.phase = RedisConnectionPhase::Disconnected;
            }
            state.broker.take()
        };
        if let Some(broker) = broker {
            broker.close().await;
        }
        inner.metrics.connection_changed(ProviderType::Redis, false);
        info!("Redis transport disconnected");
    }

    async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::SeqCst);

        if inner.link().phase == RedisConnectionPhase::Ready {
            let deadline = tokio::time::Instant::now() + inner.settings.shutdown_drain_timeout;
            drain_for_shutdown(inner, deadline).await;
        }

        let lost = lock(&inner.pending).events.len();
        if lost > 0 {
            warn!(lost, "Shutting down with undelivered Redis events");
        }
        self.disconnect().await;
    }

    fn connection_status(&self) -> bool {
        matches!(
            self.phase(),
            RedisConnectionPhase::Ready | RedisConnectionPhase::LocalOnly
        )
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Redis
    }

    fn metrics(&self) -> EventBusMetrics {
        self.inner.counters.snapshot(self.pending_len())
    }

    fn health_detail(&self) -> EventBusHealthDetail {
        let inner = &self.inner;
        let pending_events = self.pending_len();
        let state = lock(&inner.link);
        let connected = matches!(
            state.phase,
            RedisConnectionPhase::Ready | RedisConnectionPhase::LocalOnly
        );
        let delivery_mode = match state.phase {
            RedisConnectionPhase::LocalOnly => Some(DeliveryMode::Local),
            _ => state.mode,
        };

        EventBusHealthDetail {
            connected,
            producer_connected: connected,
            consumer_connected: connected,
            pending_events,
            subscription_count: inner.registry.subscription_count(),
            reconnect_attempts: state.reconnect_attempts,
            last_reconnect_at: state.last_reconnect_at,
            last_error: state.last_error.clone(),
            shutting_down: inner.shutting_down.load(Ordering::SeqCst),
            delivery_mode,
            ..EventBusHealthDetail::for_provider(ProviderType::Redis)
        }
    }
}
