//! Bounded in-memory ProcessedEventStore.
//!
//! Records live for a fixed TTL, checked lazily on lookup. When the cache is
//! full the oldest-inserted record is evicted first. Nothing survives a
//! restart, so a restarted consumer may process a redelivery again.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::sync::lock;
use crate::domain::foundation::{DomainError, EventId, Timestamp};
use crate::ports::ProcessedEventStore;

type RecordKey = (String, String);

#[derive(Debug, Clone)]
struct ProcessedRecord {
    inserted_at: Instant,
    processed_at: Timestamp,
    success: bool,
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<RecordKey, ProcessedRecord>,
    /// Insertion order; entries whose seq no longer matches are stale.
    order: VecDeque<(RecordKey, u64)>,
    next_seq: u64,
}

impl CacheState {
    fn evict_oldest(&mut self) {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|r| r.seq == seq) {
                self.entries.remove(&key);
                return;
            }
        }
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|r| r.seq == *seq));
    }
}

pub struct InMemoryProcessedEventCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    ttl: Duration,
}

impl InMemoryProcessedEventCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    fn key(event_id: &EventId, handler_name: &str) -> RecordKey {
        (event_id.as_str().to_string(), handler_name.to_string())
    }

    /// Recorded outcome, if a live record exists.
    pub fn outcome(&self, event_id: &EventId, handler_name: &str) -> Option<bool> {
        let state = lock(&self.state);
        state
            .entries
            .get(&Self::key(event_id, handler_name))
            .filter(|r| r.inserted_at.elapsed() < self.ttl)
            .map(|r| r.success)
    }

    /// Number of records currently held, expired ones included.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventCache {
    async fn contains(&self, event_id: &EventId, handler_name: &str) -> Result<bool, DomainError> {
        let key = Self::key(event_id, handler_name);
        let mut state = lock(&self.state);

        let expired = match state.entries.get(&key) {
            None => return Ok(false),
            Some(record) => record.inserted_at.elapsed() >= self.ttl,
        };

        if expired {
            state.entries.remove(&key);
            return Ok(false);
        }
        Ok(true)
    }

    async fn mark_processed(
        &self,
        event_id: &EventId,
        handler_name: &str,
        success: bool,
    ) -> Result<(), DomainError> {
        let key = Self::key(event_id, handler_name);
        let mut state = lock(&self.state);
        let now = Instant::now();

        if let Some(record) = state.entries.get_mut(&key) {
            record.inserted_at = now;
            record.processed_at = Timestamp::now();
            record.success = success;
            return Ok(());
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        state.entries.insert(
            key.clone(),
            ProcessedRecord {
                inserted_at: now,
                processed_at: Timestamp::now(),
                success,
                seq,
            },
        );
        state.order.push_back((key, seq));

        while state.entries.len() > self.max_entries {
            state.evict_oldest();
        }
        if state.order.len() > self.max_entries.saturating_mul(2) {
            state.compact_order();
        }
        Ok(())
    }

    async fn delete_before(&self, timestamp: Timestamp) -> Result<u64, DomainError> {
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state
            .entries
            .retain(|_, record| !record.processed_at.is_before(&timestamp));
        let deleted = before - state.entries.len();
        state.compact_order();
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max: usize, ttl_secs: u64) -> InMemoryProcessedEventCache {
        InMemoryProcessedEventCache::new(max, Duration::from_secs(ttl_secs))
    }

    #[tokio::test]
    async fn contains_returns_false_for_new_event() {
        let cache = cache(10, 60);
        assert!(!cache.contains(&EventId::new(), "Handler").await.unwrap());
    }

    #[tokio::test]
    async fn contains_returns_true_after_mark_processed() {
        let cache = cache(10, 60);
        let id = EventId::from_string("evt-1");

        cache.mark_processed(&id, "Handler", true).await.unwrap();

        assert!(cache.contains(&id, "Handler").await.unwrap());
        assert_eq!(cache.outcome(&id, "Handler"), Some(true));
    }

    #[tokio::test]
    async fn failed_outcome_is_recorded_too() {
        let cache = cache(10, 60);
        let id = EventId::from_string("evt-1");

        cache.mark_processed(&id, "Handler", false).await.unwrap();

        assert!(cache.contains(&id, "Handler").await.unwrap());
        assert_eq!(cache.outcome(&id, "Handler"), Some(false));
    }

    #[tokio::test]
    async fn different_handlers_track_separately() {
        let cache = cache(10, 60);
        let id = EventId::from_string("evt-456");

        cache.mark_processed(&id, "HandlerA", true).await.unwrap();

        assert!(cache.contains(&id, "HandlerA").await.unwrap());
        assert!(!cache.contains(&id, "HandlerB").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire_after_ttl() {
        let cache = cache(10, 60);
        let id = EventId::from_string("evt-ttl");
        cache.mark_processed(&id, "Handler", true).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.contains(&id, "Handler").await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.contains(&id, "Handler").await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn oldest_inserted_is_evicted_first() {
        let cache = cache(2, 60);
        let a = EventId::from_string("a");
        let b = EventId::from_string("b");
        let c = EventId::from_string("c");

        cache.mark_processed(&a, "H", true).await.unwrap();
        cache.mark_processed(&b, "H", true).await.unwrap();
        cache.mark_processed(&c, "H", true).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&a, "H").await.unwrap());
        assert!(cache.contains(&b, "H").await.unwrap());
        assert!(cache.contains(&c, "H").await.unwrap());
    }

    #[tokio::test]
    async fn re_marking_updates_in_place_without_growing() {
        let cache = cache(2, 60);
        let a = EventId::from_string("a");
        let b = EventId::from_string("b");

        cache.mark_processed(&a, "H", false).await.unwrap();
        cache.mark_processed(&a, "H", true).await.unwrap();
        cache.mark_processed(&b, "H", true).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.outcome(&a, "H"), Some(true));
    }

    #[tokio::test]
    async fn delete_before_removes_older_records() {
        let cache = cache(10, 60);
        cache
            .mark_processed(&EventId::from_string("a"), "H", true)
            .await
            .unwrap();

        let deleted = cache
            .delete_before(Timestamp::now().minus_secs(-1))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(cache.is_empty());
    }
}
