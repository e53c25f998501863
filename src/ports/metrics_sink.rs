//! MetricsSink port - Side channel for transport metrics.
//!
//! Transports report what happens to events here; where the numbers end up
//! (Prometheus, logs, nowhere) is the adapter's business.

use std::time::Duration;

use crate::domain::diagnostics::ProviderType;

/// Receiver for transport metrics.
///
/// All methods are synchronous and must be cheap; they are called on the
/// publish and delivery paths.
pub trait MetricsSink: Send + Sync {
    fn connection_changed(&self, provider: ProviderType, connected: bool);

    fn event_published(&self, event_type: &str, latency: Duration);

    fn event_received(&self, event_type: &str);

    fn publish_failed(&self, event_type: &str);

    fn handler_failed(&self, event_type: &str, handler: &str);

    fn pending_depth(&self, depth: usize);

    fn dead_lettered(&self, event_type: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that trait is object-safe
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn MetricsSink) {}
}
