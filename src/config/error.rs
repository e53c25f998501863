//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("{0} reconnect base delay exceeds its maximum")]
    InvalidBackoff(&'static str),

    #[error("Kafka buffer_warn_at exceeds buffer_max")]
    InvalidBufferThreshold,

    #[error("Invalid partition key rules: {0}")]
    InvalidPartitionRules(String),
}
