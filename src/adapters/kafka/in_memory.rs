//! In-memory Kafka broker for tests.
//!
//! Records sent to a topic the consumer is subscribed to are looped back to
//! `poll`, so a single transport can publish and consume. Connectivity can
//! be toggled, the consumer can be crashed, sends can be rejected or slowed
//! down, and topics can be deleted underneath the producer.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::adapters::events::sync::lock;
use crate::domain::foundation::StandardEvent;
use crate::ports::{BrokerError, ConsumedRecord, KafkaBroker, KafkaRecord, TopicSpec};

#[derive(Default)]
struct BrokerState {
    sent: Vec<KafkaRecord>,
    topics: HashMap<String, TopicSpec>,
    topic_requests: usize,
    subscription: Vec<String>,
    subscribe_calls: Vec<Vec<String>>,
    inbox: VecDeque<ConsumedRecord>,
    offsets: HashMap<String, i64>,
    rejected_topics: HashSet<String>,
    /// Deleted topics; sends fail with `UnknownTopic` until re-created.
    deleted_topics: HashSet<String>,
    send_delay: Duration,
}

#[derive(Clone)]
pub struct InMemoryKafkaBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    available: Arc<AtomicBool>,
    crashed: Arc<AtomicBool>,
    connect_calls: Arc<AtomicUsize>,
}

impl Default for InMemoryKafkaBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKafkaBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            available: Arc::new(AtomicBool::new(true)),
            crashed: Arc::new(AtomicBool::new(false)),
            connect_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Broker that refuses connections until `set_available(true)`.
    pub fn unavailable() -> Self {
        let broker = Self::new();
        broker.set_available(false);
        broker
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Make the next poll fail as if the consumer process died.
    pub fn crash_consumer(&self) {
        self.crashed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Reject every send to `topic` until cleared.
    pub fn reject_topic(&self, topic: &str) {
        lock(&self.state).rejected_topics.insert(topic.to_string());
    }

    /// Delete `topic` as an operator would.
    pub fn delete_topic(&self, topic: &str) {
        let mut state = lock(&self.state);
        state.topics.remove(topic);
        state.deleted_topics.insert(topic.to_string());
    }

    /// Latency added to every send.
    pub fn set_send_delay(&self, delay: Duration) {
        lock(&self.state).send_delay = delay;
    }

    pub fn sent_records(&self) -> Vec<KafkaRecord> {
        lock(&self.state).sent.clone()
    }

    /// Envelopes sent to `topic`, in send order.
    pub fn sent_events(&self, topic: &str) -> Vec<StandardEvent> {
        lock(&self.state)
            .sent
            .iter()
            .filter(|r| r.topic == topic)
            .filter_map(|r| StandardEvent::from_json_str(&r.payload).ok())
            .collect()
    }

    pub fn topic(&self, name: &str) -> Option<TopicSpec> {
        lock(&self.state).topics.get(name).cloned()
    }

    /// Number of `ensure_topic` calls received.
    pub fn topic_requests(&self) -> usize {
        lock(&self.state).topic_requests
    }

    pub fn subscribe_calls(&self) -> Vec<Vec<String>> {
        lock(&self.state).subscribe_calls.clone()
    }

    pub fn current_subscription(&self) -> Vec<String> {
        lock(&self.state).subscription.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Deliver a raw value to the consumer as if another producer sent it.
    pub fn inject(&self, topic: &str, payload: Option<&str>) {
        let mut state = lock(&self.state);
        let offset = next_offset(&mut state, topic);
        state.inbox.push_back(ConsumedRecord {
            topic: topic.to_string(),
            key: None,
            payload: payload.map(str::to_string),
            partition: 0,
            offset,
        });
        drop(state);
        self.notify.notify_waiters();
    }

    fn check(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("broker unreachable".to_string()))
        }
    }
}

fn next_offset(state: &mut BrokerState, topic: &str) -> i64 {
    let offset = state.offsets.entry(topic.to_string()).or_insert(0);
    *offset += 1;
    *offset - 1
}

#[async_trait]
impl KafkaBroker for InMemoryKafkaBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.crashed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        self.check()?;
        let mut state = lock(&self.state);
        state.topic_requests += 1;
        state.deleted_topics.remove(&spec.name);
        state
            .topics
            .entry(spec.name.clone())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    async fn send(&self, record: KafkaRecord) -> Result<(), BrokerError> {
        self.check()?;
        let delay = lock(&self.state).send_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        if state.deleted_topics.contains(&record.topic) {
            return Err(BrokerError::UnknownTopic(record.topic));
        }
        if state.rejected_topics.contains(&record.topic) {
            return Err(BrokerError::Rejected(format!(
                "record for {} rejected",
                record.topic
            )));
        }

        let offset = next_offset(&mut state, &record.topic);
        if state.subscription.contains(&record.topic) {
            state.inbox.push_back(ConsumedRecord {
                topic: record.topic.clone(),
                key: Some(record.key.clone()),
                payload: Some(record.payload.clone()),
                partition: 0,
                offset,
            });
        }
        state.sent.push(record);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        self.check()?;
        let mut state = lock(&self.state);
        state.subscription = topics.to_vec();
        state.subscribe_calls.push(topics.to_vec());
        let subscribed = state.subscription.clone();
        state.inbox.retain(|r| subscribed.contains(&r.topic));
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedRecord>, BrokerError> {
        for _ in 0..2 {
            let notified = self.notify.notified();
            if self.crashed.swap(false, Ordering::SeqCst) {
                return Err(BrokerError::Unavailable("consumer crashed".to_string()));
            }
            self.check()?;
            if let Some(record) = lock(&self.state).inbox.pop_front() {
                return Ok(Some(record));
            }
            if tokio::time::timeout(timeout, notified).await.is_err() {
                return Ok(None);
            }
        }
        Ok(None)
    }

    async fn disconnect(&self) {
        let mut state = lock(&self.state);
        state.subscription.clear();
        state.inbox.clear();
    }
}
