//! ProcessedEventStore port - Interface for tracking processed events.
//!
//! This port enables idempotent event handling by tracking which events
//! have been processed by which handlers. This prevents duplicate
//! processing when events are redelivered.
//!
//! ## Why Idempotency Matters
//!
//! Events may be delivered more than once due to:
//! - Redis stream entries reclaimed after a consumer crash
//! - Kafka offsets replayed after a rebalance
//! - Producers retrying with the same event id
//!
//! A record is written both when a handler succeeds and when it exhausts its
//! retries, so a redelivery of a dead-lettered event is skipped as well.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, EventId, Timestamp};

/// Port for tracking which events have been processed by which handlers.
///
/// Each handler has its own processing record, allowing different handlers
/// to process the same event independently while maintaining idempotency
/// within each handler.
///
/// # Example
///
/// ```ignore
/// if store.contains(&event.event_id, "UploadIndexer").await? {
///     return Ok(()); // Skip duplicate
/// }
///
/// let success = indexer.handle(event.clone()).await.is_ok();
///
/// store.mark_processed(&event.event_id, "UploadIndexer", success).await?;
/// ```
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Check if an event has been processed by a specific handler.
    ///
    /// Expired records are treated as absent.
    async fn contains(&self, event_id: &EventId, handler_name: &str) -> Result<bool, DomainError>;

    /// Record the final outcome of handling an event.
    async fn mark_processed(
        &self,
        event_id: &EventId,
        handler_name: &str,
        success: bool,
    ) -> Result<(), DomainError>;

    /// Delete records older than the specified timestamp.
    ///
    /// Returns the number of entries deleted.
    async fn delete_before(&self, timestamp: Timestamp) -> Result<u64, DomainError>;
}
