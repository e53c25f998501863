//! Handler registry shared by every transport.
//!
//! Maps event types to the handlers registered for them and fans a delivered
//! event out to all of them concurrently.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

use super::sync::{read, write};
use crate::domain::foundation::{DomainError, StandardEvent};
use crate::ports::EventHandler;

/// Identity comparison for handler trait objects.
///
/// Compares the data pointer only; vtable pointers for the same type may
/// differ across codegen units.
pub fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Event type → registered handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. Returns true when it is the first for the type.
    pub fn add(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> bool {
        let mut handlers = write(&self.handlers);
        let entry = handlers.entry(event_type.to_string()).or_default();
        entry.push(handler);
        entry.len() == 1
    }

    /// Removes one handler, or all of them when `handler` is `None`.
    ///
    /// Returns true when the type had handlers and now has none.
    pub fn remove(&self, event_type: &str, handler: Option<&Arc<dyn EventHandler>>) -> bool {
        let mut handlers = write(&self.handlers);
        let Some(entry) = handlers.get_mut(event_type) else {
            return false;
        };

        match handler {
            Some(target) => entry.retain(|h| !same_handler(h, target)),
            None => entry.clear(),
        }

        if entry.is_empty() {
            handlers.remove(event_type);
            true
        } else {
            false
        }
    }

    /// Snapshot of the handlers for a type; the lock is released on return.
    pub fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        read(&self.handlers)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        read(&self.handlers).contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = read(&self.handlers).keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of event types with at least one handler.
    pub fn subscription_count(&self) -> usize {
        read(&self.handlers).len()
    }
}

/// A handler that returned an error for a delivery.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub error: DomainError,
}

/// Runs every handler for the event concurrently and awaits them all.
///
/// Failures are logged here and returned so the caller can decide whether
/// to acknowledge.
pub async fn dispatch(
    event: &StandardEvent,
    handlers: &[Arc<dyn EventHandler>],
) -> Vec<HandlerFailure> {
    let results = join_all(handlers.iter().map(|handler| {
        let event = event.clone();
        async move { (handler.name(), handler.handle(event).await) }
    }))
    .await;

    results
        .into_iter()
        .filter_map(|(name, result)| match result {
            Ok(()) => None,
            Err(error) => {
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    handler = name,
                    error = %error,
                    "Event handler failed"
                );
                Some(HandlerFailure {
                    handler: name,
                    error,
                })
            }
        })
        .collect()
}
