//! IdempotentSubscriber - Transport-agnostic registration front end.
//!
//! Wraps every registered handler in an `IdempotentHandler` before handing it
//! to the transport, and remembers the pairing so callers can unsubscribe with
//! the handler they originally passed in.

use std::sync::{Arc, Mutex};

use super::idempotent_handler::{IdempotentHandler, SubscriptionOptions};
use super::registry::same_handler;
use super::sync::lock;
use crate::domain::foundation::DomainError;
use crate::ports::{EventHandler, EventTransport, ProcessedEventStore};

struct Registration {
    event_type: String,
    original: Arc<dyn EventHandler>,
    wrapped: Arc<dyn EventHandler>,
}

pub struct IdempotentSubscriber {
    transport: Arc<dyn EventTransport>,
    processed_events: Arc<dyn ProcessedEventStore>,
    defaults: SubscriptionOptions,
    registrations: Mutex<Vec<Registration>>,
}

impl IdempotentSubscriber {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        processed_events: Arc<dyn ProcessedEventStore>,
    ) -> Self {
        Self {
            transport,
            processed_events,
            defaults: SubscriptionOptions::default(),
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Options applied by `subscribe`.
    pub fn with_defaults(mut self, defaults: SubscriptionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn transport(&self) -> &Arc<dyn EventTransport> {
        &self.transport
    }

    /// Register with the default retry policy.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DomainError> {
        self.subscribe_with(event_type, handler, self.defaults).await
    }

    /// Register with an explicit retry policy.
    pub async fn subscribe_with(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscriptionOptions,
    ) -> Result<(), DomainError> {
        let wrapped: Arc<dyn EventHandler> = Arc::new(IdempotentHandler::new(
            handler.clone(),
            self.processed_events.clone(),
            Arc::downgrade(&self.transport),
            options,
        ));

        self.transport.subscribe(event_type, wrapped.clone()).await?;

        lock(&self.registrations).push(Registration {
            event_type: event_type.to_string(),
            original: handler,
            wrapped,
        });
        Ok(())
    }

    /// Remove one handler (the one originally registered), or all for the type.
    pub async fn unsubscribe(&self, event_type: &str, handler: Option<Arc<dyn EventHandler>>) {
        let removed: Vec<Arc<dyn EventHandler>> = {
            let mut registrations = lock(&self.registrations);
            let (removed, kept): (Vec<_>, Vec<_>) =
                registrations.drain(..).partition(|r| {
                    r.event_type == event_type
                        && handler
                            .as_ref()
                            .map_or(true, |target| same_handler(&r.original, target))
                });
            *registrations = kept;
            removed.into_iter().map(|r| r.wrapped).collect()
        };

        match handler {
            None => self.transport.unsubscribe(event_type, None).await,
            Some(_) => {
                for wrapped in removed {
                    self.transport.unsubscribe(event_type, Some(wrapped)).await;
                }
            }
        }
    }

    /// Number of live registrations made through this subscriber.
    pub fn registration_count(&self) -> usize {
        lock(&self.registrations).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::{InMemoryEventBus, InMemoryProcessedEventCache};
    use crate::domain::foundation::StandardEvent;
    use crate::ports::EventPublisher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        count: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _: StandardEvent) -> Result<(), DomainError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Counting"
        }
    }

    fn setup() -> (Arc<InMemoryEventBus>, IdempotentSubscriber) {
        let bus = Arc::new(InMemoryEventBus::new());
        let store = Arc::new(InMemoryProcessedEventCache::new(100, Duration::from_secs(60)));
        let subscriber = IdempotentSubscriber::new(bus.clone(), store);
        (bus, subscriber)
    }

    #[tokio::test]
    async fn redelivery_invokes_handler_once() {
        let (bus, subscriber) = setup();
        let handler = Arc::new(Counting {
            count: AtomicUsize::new(0),
        });
        subscriber.subscribe("x", handler.clone()).await.unwrap();
        let event = StandardEvent::test_fixture("x");

        bus.publish(event.clone()).await;
        bus.deliver(event.clone()).await;
        bus.deliver(event).await;

        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_with_original_handler_removes_wrapper() {
        let (bus, subscriber) = setup();
        let keep = Arc::new(Counting {
            count: AtomicUsize::new(0),
        });
        let gone = Arc::new(Counting {
            count: AtomicUsize::new(0),
        });
        subscriber.subscribe("x", keep.clone()).await.unwrap();
        subscriber.subscribe("x", gone.clone()).await.unwrap();

        let gone_dyn: Arc<dyn EventHandler> = gone.clone();
        subscriber.unsubscribe("x", Some(gone_dyn)).await;
        bus.publish(StandardEvent::test_fixture("x")).await;

        assert_eq!(keep.count.load(Ordering::SeqCst), 1);
        assert_eq!(gone.count.load(Ordering::SeqCst), 0);
        assert_eq!(subscriber.registration_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_all_clears_type() {
        let (bus, subscriber) = setup();
        let handler = Arc::new(Counting {
            count: AtomicUsize::new(0),
        });
        subscriber.subscribe("x", handler.clone()).await.unwrap();
        subscriber.subscribe("y", handler.clone()).await.unwrap();

        subscriber.unsubscribe("x", None).await;
        bus.publish(StandardEvent::test_fixture("x")).await;
        bus.publish(StandardEvent::test_fixture("y")).await;

        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
        assert_eq!(subscriber.registration_count(), 1);
    }
}
