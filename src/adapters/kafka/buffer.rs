//! Bounded FIFO of events waiting for the Kafka producer.

use std::collections::VecDeque;

use crate::domain::foundation::StandardEvent;

/// Result of appending to the buffer.
#[derive(Debug)]
pub struct Pushed {
    /// Oldest entry pushed out because the buffer was full.
    pub evicted: Option<StandardEvent>,
    /// True exactly once per fill cycle, when depth first reaches `warn_at`.
    pub reached_warning: bool,
    pub depth: usize,
}

#[derive(Debug)]
pub struct PendingBuffer {
    events: VecDeque<StandardEvent>,
    capacity: usize,
    warn_at: usize,
    warned: bool,
}

impl PendingBuffer {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize, warn_at: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            warn_at: warn_at.clamp(1, capacity),
            warned: false,
        }
    }

    pub fn push(&mut self, event: StandardEvent) -> Pushed {
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);

        let depth = self.events.len();
        let reached_warning = !self.warned && depth >= self.warn_at;
        if reached_warning {
            self.warned = true;
        }

        Pushed {
            evicted,
            reached_warning,
            depth,
        }
    }

    /// Put an event back at the head after a failed send.
    ///
    /// Returns the event when the buffer has refilled in the meantime; it is
    /// the oldest entry, so it is the one that has to overflow.
    pub fn push_front(&mut self, event: StandardEvent) -> Option<StandardEvent> {
        if self.events.len() >= self.capacity {
            return Some(event);
        }
        self.events.push_front(event);
        None
    }

    pub fn pop_front(&mut self) -> Option<StandardEvent> {
        let event = self.events.pop_front();
        if self.events.is_empty() {
            self.warned = false;
        }
        event
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> StandardEvent {
        StandardEvent::test_fixture("x").with_correlation_id(format!("c-{}", n))
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut buffer = PendingBuffer::new(2, 2);
        buffer.push(event(1));
        buffer.push(event(2));

        let pushed = buffer.push(event(3));

        assert_eq!(pushed.evicted.unwrap().correlation_id, "c-1");
        assert_eq!(pushed.depth, 2);
        assert_eq!(buffer.pop_front().unwrap().correlation_id, "c-2");
    }

    #[test]
    fn warns_once_per_fill_cycle() {
        let mut buffer = PendingBuffer::new(10, 3);
        let warnings: usize = (0..8)
            .map(|n| buffer.push(event(n)).reached_warning as usize)
            .sum();
        assert_eq!(warnings, 1);

        while buffer.pop_front().is_some() {}
        let rearmed: usize = (0..3)
            .map(|n| buffer.push(event(n)).reached_warning as usize)
            .sum();
        assert_eq!(rearmed, 1);
    }

    #[test]
    fn partial_drain_does_not_rearm_warning() {
        let mut buffer = PendingBuffer::new(10, 2);
        buffer.push(event(1));
        assert!(buffer.push(event(2)).reached_warning);

        buffer.pop_front();
        assert!(!buffer.push(event(3)).reached_warning);
    }

    #[test]
    fn push_front_refuses_when_full() {
        let mut buffer = PendingBuffer::new(1, 1);
        buffer.push(event(2));

        let refused = buffer.push_front(event(1));

        assert_eq!(refused.unwrap().correlation_id, "c-1");
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buffer = PendingBuffer::new(0, 0);
        assert_eq!(buffer.capacity(), 1);
    }
}
