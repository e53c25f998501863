//! EventSubscriber port - Interface for subscribing to events.
//!
//! This port defines how handlers register interest in event types
//! without knowing about the underlying transport mechanism.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::foundation::{DomainError, StandardEvent};

/// Handler for processing delivered events.
///
/// Implementations should be:
/// - **Idempotent** - Safe to call multiple times with same event
/// - **Quick** - Long operations should be queued for async processing
/// - **Isolated** - Errors don't affect other handlers
///
/// # Example
///
/// ```ignore
/// struct UploadIndexer { /* ... */ }
///
/// #[async_trait]
/// impl EventHandler for UploadIndexer {
///     async fn handle(&self, event: StandardEvent) -> Result<(), DomainError> {
///         let upload: FileUploaded = event.data_as()
///             .map_err(|e| DomainError::handler(e.to_string()))?;
///         // Index the file...
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "UploadIndexer"
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process an event.
    async fn handle(&self, event: StandardEvent) -> Result<(), DomainError>;

    /// Handler name for logging, metrics and deduplication records.
    fn name(&self) -> &'static str;
}

/// Port for subscribing to events.
///
/// Registration is durable: subscribing before the transport is connected is
/// legal and takes effect once it connects.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Register a handler for an event type.
    ///
    /// Multiple handlers per type are allowed and all are invoked on delivery.
    /// Only a failure reported by a live broker is returned as an error.
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DomainError>;

    /// Remove one handler (matched by identity), or every handler for the
    /// type when `handler` is `None`.
    ///
    /// Removing the last handler tears down the broker subscription.
    async fn unsubscribe(&self, event_type: &str, handler: Option<Arc<dyn EventHandler>>);

    /// Begin actively pulling registered subscriptions.
    ///
    /// Push-based transports treat this as a no-op.
    async fn start_consuming(&self) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that traits are object-safe
    #[allow(dead_code)]
    fn assert_handler_object_safe(_: &dyn EventHandler) {}

    #[allow(dead_code)]
    fn assert_subscriber_object_safe(_: &dyn EventSubscriber) {}

    struct Named;

    #[async_trait]
    impl EventHandler for Named {
        async fn handle(&self, _: StandardEvent) -> Result<(), DomainError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Named"
        }
    }

    #[tokio::test]
    async fn handler_is_usable_through_arc_dyn() {
        let handler: Arc<dyn EventHandler> = Arc::new(Named);
        assert_eq!(handler.name(), "Named");
        assert!(handler
            .handle(StandardEvent::test_fixture("x"))
            .await
            .is_ok());
    }
}
