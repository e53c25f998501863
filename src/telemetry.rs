//! Tracing subscriber setup for binaries built on the event bus.

use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::{LogFormat, ServiceConfig};

const FALLBACK_DIRECTIVE: &str = "info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `service.log_level`. Fails if a subscriber is
/// already installed.
pub fn init_tracing(config: &ServiceConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    }
}

/// Filter for a configured directive; an unparsable one falls back to `info`.
fn filter_for(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVE))
}
