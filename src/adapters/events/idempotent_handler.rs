//! IdempotentHandler - Dedup, bounded retry and dead-letter escalation.
//!
//! This adapter wraps any `EventHandler` and uses a `ProcessedEventStore`
//! so each event is processed at most once per handler within the store's
//! TTL, no matter which transport delivered it.
//!
//! ## How It Works
//!
//! 1. Before processing: skip if the (event, handler) pair has a record
//! 2. Invoke the inner handler up to `max_retries + 1` times, sleeping a
//!    fixed `retry_delay` between attempts
//! 3. On success: record `success = true`
//! 4. On exhaustion: record `success = false`, then hand the event to the
//!    transport's dead-letter path. Without one, the last error is returned
//!    to the transport.
//!
//! ProcessedEventStore errors are propagated to the caller.

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::domain::foundation::{DomainError, StandardEvent};
use crate::ports::{EventHandler, EventTransport, ProcessedEventStore};

/// Per-registration retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Wrapper that ensures at-most-once event processing per handler.
///
/// Holds the transport weakly: the transport's registry owns this handler,
/// so a strong reference would keep both alive forever.
pub struct IdempotentHandler {
    inner: Arc<dyn EventHandler>,
    processed_events: Arc<dyn ProcessedEventStore>,
    transport: Weak<dyn EventTransport>,
    options: SubscriptionOptions,
}

impl IdempotentHandler {
    pub fn new(
        inner: Arc<dyn EventHandler>,
        processed_events: Arc<dyn ProcessedEventStore>,
        transport: Weak<dyn EventTransport>,
        options: SubscriptionOptions,
    ) -> Self {
        Self {
            inner,
            processed_events,
            transport,
            options,
        }
    }

    pub fn inner(&self) -> &Arc<dyn EventHandler> {
        &self.inner
    }

    async fn escalate(&self, event: &StandardEvent, last_error: DomainError) -> Result<(), DomainError> {
        let Some(transport) = self.transport.upgrade() else {
            return Err(last_error);
        };
        if !transport.supports_dead_letter() {
            return Err(last_error);
        }

        match transport.publish_to_dlq(event, &last_error).await {
            Ok(()) => {
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    handler = self.inner.name(),
                    error = %last_error,
                    "Event dead-lettered after exhausting retries"
                );
                Ok(())
            }
            Err(dlq_error) => {
                error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    handler = self.inner.name(),
                    error = %dlq_error,
                    "Dead-letter publish failed"
                );
                Err(last_error)
            }
        }
    }
}

#[async_trait]
impl EventHandler for IdempotentHandler {
    async fn handle(&self, event: StandardEvent) -> Result<(), DomainError> {
        let handler_name = self.inner.name();

        if self
            .processed_events
            .contains(&event.event_id, handler_name)
            .await?
        {
            debug!(
                event_id = %event.event_id,
                handler = handler_name,
                "Skipping duplicate event"
            );
            return Ok(());
        }

        let max_attempts = self.options.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.inner.handle(event.clone()).await {
                Ok(()) => {
                    self.processed_events
                        .mark_processed(&event.event_id, handler_name, true)
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        handler = handler_name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Event handler attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }

        self.processed_events
            .mark_processed(&event.event_id, handler_name, false)
            .await?;

        let last_error =
            last_error.unwrap_or_else(|| DomainError::handler("handler made no attempts"));
        self.escalate(&event, last_error).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
