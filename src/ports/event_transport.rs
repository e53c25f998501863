//! EventTransport port - The unified contract both brokers implement.
//!
//! A transport is a publisher and subscriber plus a lifecycle and read-only
//! introspection. Producers and the idempotent subscriber only ever see this
//! trait; which broker sits behind it is decided once by the factory.

use async_trait::async_trait;

use super::{EventPublisher, EventSubscriber};
use crate::domain::diagnostics::{EventBusHealthDetail, EventBusMetrics, ProviderType};
use crate::domain::foundation::{DomainError, ErrorCode, StandardEvent};

#[async_trait]
pub trait EventTransport: EventPublisher + EventSubscriber {
    /// Start the connection state machine.
    ///
    /// Never fails: an unreachable broker moves the transport into its
    /// degraded mode and a background reconnect takes over.
    async fn connect(&self);

    /// Whether `publish_to_dlq` actually ships dead letters.
    fn supports_dead_letter(&self) -> bool {
        false
    }

    /// Hand a permanently failed event to the dead-letter destination.
    async fn publish_to_dlq(
        &self,
        event: &StandardEvent,
        error: &DomainError,
    ) -> Result<(), DomainError> {
        let _ = error;
        Err(DomainError::new(
            ErrorCode::PublishRejected,
            format!(
                "{} transport has no dead-letter destination",
                self.provider_type()
            ),
        )
        .with_detail("event_id", event.event_id.as_str()))
    }

    /// Release broker resources immediately.
    async fn disconnect(&self);

    /// Drain buffered events within the configured budget, then disconnect.
    async fn shutdown(&self);

    /// Whether producers currently see the transport as connected.
    fn connection_status(&self) -> bool;

    fn provider_type(&self) -> ProviderType;

    fn metrics(&self) -> EventBusMetrics;

    fn health_detail(&self) -> EventBusHealthDetail;
}
