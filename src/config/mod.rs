//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `AIPONGE` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use aiponge_event_bus::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Event bus provider: {}", config.event_bus.provider);
//! ```

mod error;
mod event_bus;
mod kafka;
mod redis;
mod service;
mod subscriber;

pub use error::{ConfigError, ValidationError};
pub use event_bus::EventBusConfig;
pub use kafka::KafkaConfig;
pub use redis::RedisConfig;
pub use service::{Environment, LogFormat, ServiceConfig};
pub use subscriber::SubscriberConfig;

use serde::Deserialize;

use crate::domain::diagnostics::ProviderType;

/// Root application configuration
///
/// Every section has defaults, so an empty environment yields a Redis bus
/// running in-process only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Service identity and logging
    #[serde(default)]
    pub service: ServiceConfig,

    /// Transport selection
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Redis transport settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Kafka transport settings
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Idempotent subscriber defaults
    #[serde(default)]
    pub subscriber: SubscriberConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `AIPONGE` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `AIPONGE__SERVICE__NAME=music-service` -> `service.name = music-service`
    /// - `AIPONGE__EVENT_BUS__PROVIDER=kafka` -> `event_bus.provider = kafka`
    /// - `AIPONGE__REDIS__URL=redis://...` -> `redis.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("AIPONGE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// Only the section for the selected provider is checked besides the
    /// common ones, so an unused Kafka block never blocks a Redis deployment.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.service.validate()?;
        self.subscriber.validate()?;
        match self.event_bus.provider {
            ProviderType::Redis => self.redis.validate()?,
            ProviderType::Kafka => self.kafka.validate()?,
            ProviderType::InMemory => {}
        }
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.service.is_production()
    }
}
