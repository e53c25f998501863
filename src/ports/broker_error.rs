//! Errors reported by broker clients.

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};

/// Failure of a single broker round-trip.
///
/// Transports decide recovery by variant: `Unavailable` routes to buffering
/// and reconnection, `NoGroup` and `UnknownTopic` are healed in place, the
/// rest are logged against the event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("consumer group does not exist: {0}")]
    NoGroup(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("broker rejected request: {0}")]
    Rejected(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl BrokerError {
    /// True when the connection itself is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<BrokerError> for DomainError {
    fn from(err: BrokerError) -> Self {
        let code = match &err {
            BrokerError::Unavailable(_) => ErrorCode::TransportUnavailable,
            BrokerError::NoGroup(_) | BrokerError::UnknownTopic(_) => ErrorCode::SubscriptionFailed,
            BrokerError::Rejected(_) => ErrorCode::PublishRejected,
            BrokerError::Serialization(_) => ErrorCode::SerializationFailed,
        };
        DomainError::new(code, err.to_string())
    }
}
