//! MetricsSink adapters.

use std::time::Duration;
use tracing::{debug, trace};

use crate::domain::diagnostics::ProviderType;
use crate::ports::MetricsSink;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn connection_changed(&self, _: ProviderType, _: bool) {}
    fn event_published(&self, _: &str, _: Duration) {}
    fn event_received(&self, _: &str) {}
    fn publish_failed(&self, _: &str) {}
    fn handler_failed(&self, _: &str, _: &str) {}
    fn pending_depth(&self, _: usize) {}
    fn dead_lettered(&self, _: &str) {}
}

/// Emits metrics as tracing events under the `event_bus::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn connection_changed(&self, provider: ProviderType, connected: bool) {
        debug!(target: "event_bus::metrics", %provider, connected, "connection_status");
    }

    fn event_published(&self, event_type: &str, latency: Duration) {
        trace!(
            target: "event_bus::metrics",
            event_type,
            latency_ms = latency.as_millis() as u64,
            "event_published"
        );
    }

    fn event_received(&self, event_type: &str) {
        trace!(target: "event_bus::metrics", event_type, "event_received");
    }

    fn publish_failed(&self, event_type: &str) {
        debug!(target: "event_bus::metrics", event_type, "publish_failed");
    }

    fn handler_failed(&self, event_type: &str, handler: &str) {
        debug!(target: "event_bus::metrics", event_type, handler, "handler_failed");
    }

    fn pending_depth(&self, depth: usize) {
        trace!(target: "event_bus::metrics", depth, "pending_depth");
    }

    fn dead_lettered(&self, event_type: &str) {
        debug!(target: "event_bus::metrics", event_type, "dead_lettered");
    }
}
