//! Per-transport counters behind `metrics()`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::diagnostics::EventBusMetrics;
use crate::domain::foundation::StandardEvent;

/// Monotonic counters updated on the publish and delivery paths.
#[derive(Debug, Default)]
pub struct TransportCounters {
    sequence: AtomicU64,
    pub published: AtomicU64,
    pub received: AtomicU64,
    pub publish_errors: AtomicU64,
    pub handler_errors: AtomicU64,
    pub buffered: AtomicU64,
    pub dropped: AtomicU64,
    pub overflowed: AtomicU64,
    pub replayed: AtomicU64,
    pub dlq_published: AtomicU64,
    pub buffer_warnings: AtomicU64,
}

impl TransportCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills in `sequence_number` from this instance's counter when absent.
    pub fn assign_sequence(&self, event: &mut StandardEvent) {
        if event.sequence_number.is_none() {
            event.sequence_number = Some(self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending_events: usize) -> EventBusMetrics {
        EventBusMetrics {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            dlq_published: self.dlq_published.load(Ordering::Relaxed),
            buffer_warnings: self.buffer_warnings.load(Ordering::Relaxed),
            pending_events,
        }
    }
}
