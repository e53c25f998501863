//! Idempotent subscriber configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Retry and dedup defaults for idempotent subscriptions
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Processed-event cache capacity
    #[serde(default = "default_processed_cache_max")]
    pub processed_cache_max: usize,

    /// Processed-event record lifetime in seconds
    #[serde(default = "default_processed_ttl_secs")]
    pub processed_ttl_secs: u64,
}

impl SubscriberConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn processed_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_ttl_secs)
    }

    /// Validate subscriber configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.processed_cache_max == 0 {
            return Err(ValidationError::MustBePositive(
                "subscriber.processed_cache_max",
            ));
        }
        if self.processed_ttl_secs == 0 {
            return Err(ValidationError::MustBePositive(
                "subscriber.processed_ttl_secs",
            ));
        }
        Ok(())
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            processed_cache_max: default_processed_cache_max(),
            processed_ttl_secs: default_processed_ttl_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_processed_cache_max() -> usize {
    10_000
}

fn default_processed_ttl_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_defaults() {
        let config = SubscriberConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.processed_cache_max, 10_000);
        assert_eq!(config.processed_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_zero_retries_is_valid() {
        let config = SubscriberConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_empty_cache() {
        let config = SubscriberConfig {
            processed_cache_max: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
