//! In-memory Redis server for tests.
//!
//! Implements just enough of streams, consumer groups and Pub/Sub to drive
//! `RedisEventTransport` deterministically. Each connector acts as one
//! client whose connectivity can be toggled independently, which is how
//! tests simulate one service losing its broker while others keep going.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::adapters::events::sync::lock;
use crate::domain::foundation::StandardEvent;
use crate::ports::{
    BrokerError, GroupStart, RedisBroker, RedisConnector, StreamEntry, StreamStart,
};

#[derive(Default)]
struct GroupData {
    last_delivered: u64,
    /// Delivered but unacknowledged entry → consumer name.
    pending: BTreeMap<u64, String>,
}

#[derive(Default)]
struct StreamData {
    entries: VecDeque<(u64, Option<String>)>,
    next_id: u64,
    groups: HashMap<String, GroupData>,
}

impl StreamData {
    fn append(&mut self, payload: Option<String>, max_len: usize) -> u64 {
        self.next_id += 1;
        self.entries.push_back((self.next_id, payload));
        while self.entries.len() > max_len {
            self.entries.pop_front();
        }
        self.next_id
    }
}

struct ChannelSubscriber {
    client: u64,
    tx: mpsc::UnboundedSender<String>,
}

struct ServerState {
    major_version: Option<u32>,
    streams: HashMap<String, StreamData>,
    channels: HashMap<String, Vec<ChannelSubscriber>>,
    published: HashMap<String, Vec<String>>,
    /// Latency added to every `XADD` and `PUBLISH`.
    write_delay: Duration,
}

fn format_id(id: u64) -> String {
    format!("{}-0", id)
}

fn parse_id(id: &str) -> u64 {
    id.split('-')
        .next()
        .and_then(|ms| ms.parse().ok())
        .unwrap_or(0)
}

/// Shared in-memory Redis server.
#[derive(Clone)]
pub struct InMemoryRedisServer {
    state: Arc<Mutex<ServerState>>,
    notify: Arc<Notify>,
    next_client: Arc<AtomicU64>,
}

impl InMemoryRedisServer {
    /// Server reporting the given major version in `INFO server`.
    pub fn new(major_version: u32) -> Self {
        Self::with_version(Some(major_version))
    }

    /// Server whose `INFO server` output carries no parsable version.
    pub fn with_unknown_version() -> Self {
        Self::with_version(None)
    }

    fn with_version(major_version: Option<u32>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                major_version,
                streams: HashMap::new(),
                channels: HashMap::new(),
                published: HashMap::new(),
                write_delay: Duration::ZERO,
            })),
            notify: Arc::new(Notify::new()),
            next_client: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Slow down writes, as a loaded server would.
    pub fn set_write_delay(&self, delay: Duration) {
        lock(&self.state).write_delay = delay;
    }

    async fn write_latency(&self) {
        let delay = lock(&self.state).write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// A new client of this server, initially reachable.
    pub fn connector(&self) -> Arc<InMemoryRedisConnector> {
        Arc::new(InMemoryRedisConnector {
            server: self.clone(),
            client: self.next_client.fetch_add(1, Ordering::SeqCst),
            up: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Raw payloads currently held by a stream.
    pub fn stream_payloads(&self, key: &str) -> Vec<String> {
        lock(&self.state)
            .streams
            .get(key)
            .map(|s| s.entries.iter().filter_map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Envelopes currently held by a stream, skipping unparsable entries.
    pub fn stream_events(&self, key: &str) -> Vec<StandardEvent> {
        self.stream_payloads(key)
            .iter()
            .filter_map(|p| StandardEvent::from_json_str(p).ok())
            .collect()
    }

    /// Appends an entry directly, bypassing any client.
    pub fn add_raw_entry(&self, key: &str, payload: Option<&str>) -> String {
        let mut state = lock(&self.state);
        let id = state
            .streams
            .entry(key.to_string())
            .or_default()
            .append(payload.map(str::to_string), usize::MAX);
        drop(state);
        self.notify.notify_waiters();
        format_id(id)
    }

    /// Every message ever published on a channel.
    pub fn channel_messages(&self, channel: &str) -> Vec<String> {
        lock(&self.state)
            .published
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.state)
            .channels
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
    }

    pub fn group_exists(&self, key: &str, group: &str) -> bool {
        lock(&self.state)
            .streams
            .get(key)
            .is_some_and(|s| s.groups.contains_key(group))
    }

    /// Entries delivered to the group but not yet acknowledged.
    pub fn pending_count(&self, key: &str, group: &str) -> usize {
        lock(&self.state)
            .streams
            .get(key)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    /// `XGROUP DESTROY`.
    pub fn destroy_group(&self, key: &str, group: &str) {
        if let Some(stream) = lock(&self.state).streams.get_mut(key) {
            stream.groups.remove(group);
        }
        self.notify.notify_waiters();
    }

    fn drop_client_subscriptions(&self, client: u64) {
        let mut state = lock(&self.state);
        for subscribers in state.channels.values_mut() {
            subscribers.retain(|s| s.client != client);
        }
    }
}

/// One client of the in-memory server.
pub struct InMemoryRedisConnector {
    server: InMemoryRedisServer,
    client: u64,
    up: Arc<AtomicBool>,
}

impl InMemoryRedisConnector {
    /// Cut or restore this client's connectivity.
    ///
    /// Cutting it ends its Pub/Sub subscriptions and fails blocked reads.
    pub fn set_available(&self, available: bool) {
        self.up.store(available, Ordering::SeqCst);
        if !available {
            self.server.drop_client_subscriptions(self.client);
        }
        self.server.notify.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RedisConnector for InMemoryRedisConnector {
    async fn connect(&self) -> Result<Arc<dyn RedisBroker>, BrokerError> {
        if !self.is_available() {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        Ok(Arc::new(InMemoryRedisBroker {
            server: self.server.clone(),
            client: self.client,
            up: self.up.clone(),
        }))
    }
}

/// A connection opened by `InMemoryRedisConnector`.
pub struct InMemoryRedisBroker {
    server: InMemoryRedisServer,
    client: u64,
    up: Arc<AtomicBool>,
}

impl InMemoryRedisBroker {
    fn check(&self) -> Result<(), BrokerError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("connection reset".to_string()))
        }
    }

    fn read_once(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        start: &StreamStart,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let mut state = lock(&self.server.state);
        let no_group = || BrokerError::NoGroup(format!("{} {}", stream, group));
        let data = state.streams.get_mut(stream).ok_or_else(no_group)?;
        let StreamData {
            entries, groups, ..
        } = data;
        let group_data = groups.get_mut(group).ok_or_else(no_group)?;

        match start {
            StreamStart::Pending(cursor) => {
                let after = parse_id(cursor);
                let ids: Vec<u64> = group_data
                    .pending
                    .range(after.saturating_add(1)..)
                    .filter(|(_, owner)| owner.as_str() == consumer)
                    .map(|(id, _)| *id)
                    .take(count)
                    .collect();
                Ok(ids
                    .into_iter()
                    .map(|id| StreamEntry {
                        id: format_id(id),
                        payload: entries
                            .iter()
                            .find(|(entry_id, _)| *entry_id == id)
                            .and_then(|(_, p)| p.clone()),
                    })
                    .collect())
            }
            StreamStart::New => {
                let fresh: Vec<(u64, Option<String>)> = entries
                    .iter()
                    .filter(|(id, _)| *id > group_data.last_delivered)
                    .take(count)
                    .cloned()
                    .collect();
                for (id, _) in &fresh {
                    group_data.last_delivered = *id;
                    group_data.pending.insert(*id, consumer.to_string());
                }
                Ok(fresh
                    .into_iter()
                    .map(|(id, payload)| StreamEntry {
                        id: format_id(id),
                        payload,
                    })
                    .collect())
            }
        }
    }
}

#[async_trait]
impl RedisBroker for InMemoryRedisBroker {
    async fn server_major_version(&self) -> Result<Option<u32>, BrokerError> {
        self.check()?;
        Ok(lock(&self.server.state).major_version)
    }

    async fn xadd(&self, stream: &str, max_len: usize, payload: &str) -> Result<String, BrokerError> {
        self.check()?;
        self.server.write_latency().await;
        let id = lock(&self.server.state)
            .streams
            .entry(stream.to_string())
            .or_default()
            .append(Some(payload.to_string()), max_len);
        self.server.notify.notify_waiters();
        Ok(format_id(id))
    }

    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BrokerError> {
        self.check()?;
        let mut state = lock(&self.server.state);
        let data = state.streams.entry(stream.to_string()).or_default();
        let last = match start {
            GroupStart::Tail => data.next_id,
            GroupStart::Beginning => 0,
        };
        data.groups.entry(group.to_string()).or_insert_with(|| GroupData {
            last_delivered: last,
            pending: BTreeMap::new(),
        });
        Ok(())
    }

    async fn xgroup_delconsumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<(), BrokerError> {
        self.check()?;
        let mut state = lock(&self.server.state);
        if let Some(group_data) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group_data.pending.retain(|_, owner| owner != consumer);
        }
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
        let deadline = Instant::now() + block;
        loop {
            let notified = self.server.notify.notified();
            self.check()?;

            let entries = self.read_once(stream, group, consumer, start, count)?;
            if !entries.is_empty() || matches!(start, StreamStart::Pending(_)) {
                return Ok(entries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(entries);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError> {
        self.check()?;
        let mut state = lock(&self.server.state);
        if let Some(group_data) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group_data.pending.remove(&parse_id(id));
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        self.check()?;
        self.server.write_latency().await;
        let mut state = lock(&self.server.state);
        state
            .published
            .entry(channel.to_string())
            .or_default()
            .push(payload.to_string());
        if let Some(subscribers) = state.channels.get_mut(channel) {
            subscribers.retain(|s| s.tx.send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BrokerError> {
        self.check()?;
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.server.state)
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(ChannelSubscriber {
                client: self.client,
                tx,
            });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
        .boxed())
    }

    async fn close(&self) {}
}
