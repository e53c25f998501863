//! EventPublisher port - Interface for publishing events.
//!
//! This port defines how producers publish events without knowing
//! about the underlying transport mechanism (in-process, Redis, Kafka).

use async_trait::async_trait;

use crate::domain::foundation::StandardEvent;

/// What happened to a published event.
///
/// Publishing never fails from the caller's point of view; the outcome is
/// informational and failures are only observable through logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the broker.
    Delivered,
    /// Delivered to handlers registered in this process.
    LocallyDispatched,
    /// Held in a pending buffer until the broker is reachable.
    Buffered,
    /// Could not be delivered or buffered; already logged.
    Dropped,
}

impl PublishOutcome {
    /// True unless the event was dropped.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, PublishOutcome::Dropped)
    }
}

/// Port for publishing events.
///
/// Implementations must ensure:
/// - Events are delivered at-least-once (handlers may receive duplicates)
/// - `publish` returns only after the event is delivered, queued, or buffered
/// - Transport failures never propagate to the caller
///
/// # Example
///
/// ```ignore
/// let event = StandardEvent::from_json("user.created", "user-service", payload);
/// publisher.publish(event).await;
/// ```
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    ///
    /// Assigns `sequence_number` when the event has none.
    async fn publish(&self, event: StandardEvent) -> PublishOutcome;

    /// Publish multiple events in order.
    ///
    /// Events are published sequentially; one outcome is returned per event.
    async fn publish_all(&self, events: Vec<StandardEvent>) -> Vec<PublishOutcome> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(self.publish(event).await);
        }
        outcomes
    }
}
