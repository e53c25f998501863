//! Standalone event bus node.
//!
//! Connects the configured transport, reports health periodically and drains
//! on Ctrl-C. Services normally embed `EventBusClient` instead.

use std::sync::Arc;
use std::time::Duration;

use aiponge_event_bus::adapters::events::TracingMetricsSink;
use aiponge_event_bus::application::EventBusClient;
use aiponge_event_bus::config::{AppConfig, ValidationError};
use aiponge_event_bus::telemetry::init_tracing;

const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config.service)?;

    match config.validate() {
        Ok(()) => {}
        // The Redis transport degrades to in-process delivery on its own.
        Err(ValidationError::InvalidRedisUrl) => {
            tracing::warn!("Redis URL is malformed; continuing with in-process delivery")
        }
        Err(e) => return Err(e.into()),
    }
    tracing::info!(
        service = %config.service.name,
        provider = %config.event_bus.provider,
        environment = ?config.service.environment,
        "config loaded"
    );

    let client = EventBusClient::from_config(&config, Arc::new(TracingMetricsSink))?;
    client.start().await;
    client.start_consuming().await?;

    let mut ticker = tokio::time::interval(HEALTH_REPORT_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let detail = client.health_detail();
                tracing::info!(
                    connected = detail.connected,
                    pending = detail.pending_events,
                    reconnect_attempts = detail.reconnect_attempts,
                    "event bus health"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    client.shutdown().await;
    tracing::info!(metrics = ?client.metrics(), "event bus stopped");
    Ok(())
}
