//! In-memory event bus implementation for testing.
//!
//! Provides synchronous, deterministic event delivery for unit tests and
//! records everything published or dead-lettered for assertions.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::counters::TransportCounters;
use super::registry::{dispatch, HandlerRegistry};
use super::sync::{read, write};
use crate::domain::diagnostics::{EventBusHealthDetail, EventBusMetrics, ProviderType};
use crate::domain::foundation::{DomainError, ErrorCode, StandardEvent, Timestamp};
use crate::ports::{EventHandler, EventPublisher, EventSubscriber, EventTransport, PublishOutcome};

/// A dead letter captured by the in-memory bus.
#[derive(Debug, Clone)]
pub struct RecordedDeadLetter {
    pub event: StandardEvent,
    pub error: String,
}

/// In-memory event bus for testing.
///
/// Features:
/// - Synchronous delivery (handlers complete before `publish` returns)
/// - Event capture for assertions
/// - Dead-letter capture
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(InMemoryEventBus::new());
///
/// bus.publish(event).await;
///
/// assert_eq!(bus.event_count(), 1);
/// assert!(bus.has_event("user.created"));
/// ```
pub struct InMemoryEventBus {
    registry: HandlerRegistry,
    published: RwLock<Vec<StandardEvent>>,
    dead_letters: RwLock<Vec<RecordedDeadLetter>>,
    counters: TransportCounters,
    dead_letter_enabled: bool,
    shutting_down: AtomicBool,
}

impl InMemoryEventBus {
    /// Creates a new empty event bus with dead-lettering enabled.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            published: RwLock::new(Vec::new()),
            dead_letters: RwLock::new(Vec::new()),
            counters: TransportCounters::new(),
            dead_letter_enabled: true,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Creates a bus that reports no dead-letter support.
    pub fn without_dead_letter() -> Self {
        Self {
            dead_letter_enabled: false,
            ..Self::new()
        }
    }

    // === Test Helpers ===

    /// Returns all published events.
    pub fn published_events(&self) -> Vec<StandardEvent> {
        read(&self.published).clone()
    }

    /// Returns events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<StandardEvent> {
        self.published_events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Returns every dead letter handed to the bus.
    pub fn dead_letters(&self) -> Vec<RecordedDeadLetter> {
        read(&self.dead_letters).clone()
    }

    /// Clears recorded events and dead letters.
    pub fn clear(&self) {
        write(&self.published).clear();
        write(&self.dead_letters).clear();
    }

    /// Returns count of published events.
    pub fn event_count(&self) -> usize {
        read(&self.published).len()
    }

    /// Checks if a specific event type was published.
    pub fn has_event(&self, event_type: &str) -> bool {
        read(&self.published)
            .iter()
            .any(|e| e.event_type == event_type)
    }

    /// Delivers an event to local handlers without recording it as published.
    ///
    /// Simulates a broker redelivery.
    pub async fn deliver(&self, event: StandardEvent) -> Vec<DomainError> {
        let handlers = self.registry.handlers_for(&event.event_type);
        TransportCounters::incr(&self.counters.received);
        dispatch(&event, &handlers)
            .await
            .into_iter()
            .map(|failure| failure.error)
            .collect()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, mut event: StandardEvent) -> PublishOutcome {
        self.counters.assign_sequence(&mut event);
        write(&self.published).push(event.clone());
        TransportCounters::incr(&self.counters.published);

        let failures = self.deliver(event).await;
        TransportCounters::add(&self.counters.handler_errors, failures.len() as u64);
        PublishOutcome::LocallyDispatched
    }
}

#[async_trait]
impl EventSubscriber for InMemoryEventBus {
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DomainError> {
        self.registry.add(event_type, handler);
        Ok(())
    }

    async fn unsubscribe(&self, event_type: &str, handler: Option<Arc<dyn EventHandler>>) {
        self.registry.remove(event_type, handler.as_ref());
    }

    async fn start_consuming(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

#[async_trait]
impl EventTransport for InMemoryEventBus {
    async fn connect(&self) {}

    fn supports_dead_letter(&self) -> bool {
        self.dead_letter_enabled
    }

    async fn publish_to_dlq(
        &self,
        event: &StandardEvent,
        error: &DomainError,
    ) -> Result<(), DomainError> {
        if !self.dead_letter_enabled {
            return Err(DomainError::new(
                ErrorCode::PublishRejected,
                "dead-lettering disabled",
            ));
        }
        let dead_letter = event
            .to_dead_letter(&error.to_string(), Timestamp::now())
            .map_err(|e| {
                DomainError::new(
                    ErrorCode::SerializationFailed,
                    e.to_string(),
                )
            })?;
        write(&self.dead_letters).push(RecordedDeadLetter {
            event: dead_letter,
            error: error.to_string(),
        });
        TransportCounters::incr(&self.counters.dlq_published);
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    fn connection_status(&self) -> bool {
        true
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn metrics(&self) -> EventBusMetrics {
        self.counters.snapshot(0)
    }

    fn health_detail(&self) -> EventBusHealthDetail {
        let metrics = self.metrics();
        EventBusHealthDetail {
            connected: true,
            producer_connected: true,
            consumer_connected: true,
            subscription_count: self.registry.subscription_count(),
            dlq_published: metrics.dlq_published,
            shutting_down: self.shutting_down.load(Ordering::SeqCst),
            ..EventBusHealthDetail::for_provider(ProviderType::InMemory)
        }
    }
}
