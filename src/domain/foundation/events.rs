//! Event infrastructure for cross-service event distribution.
//!
//! This module provides the wire-level types exchanged between services:
//! - `EventId` - Unique identifier for events (deduplication)
//! - `StandardEvent` - The envelope every transport carries
//!
//! The envelope is the only structure that crosses the wire. Transports never
//! inspect `data`; they route on `type` and key on the identifiers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use uuid::Uuid;

use super::{Timestamp, ValidationError};

/// Schema version stamped on every envelope produced by this crate.
pub const EVENT_SCHEMA_VERSION: &str = "1.0";

/// Suffix appended to an event type to name its dead-letter type.
pub const DEAD_LETTER_SUFFIX: &str = ".dlq";

/// Unique identifier for events (used for deduplication).
///
/// EventId uses a String internally to allow for various ID formats
/// produced by other services (UUID, ULID, etc.) while maintaining
/// serializability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates a new random EventId using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates an EventId from an existing string.
    ///
    /// No validation is performed - any string is accepted.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport envelope exchanged between producers and consumers.
///
/// - `event_id` is the idempotency key; a retry of the same logical event
///   reuses it.
/// - `correlation_id` groups related events and is propagated, never
///   regenerated per retry.
/// - `sequence_number` is filled in by the publishing client when absent and
///   is only meaningful within one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardEvent {
    /// Unique ID for this event instance.
    pub event_id: EventId,

    /// Correlation across services and requests.
    pub correlation_id: String,

    /// Dot-namespaced routing type (e.g., "analytics.events.batch").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the producer created the event.
    pub timestamp: Timestamp,

    /// Schema version of `data`.
    pub version: String,

    /// Producing service name.
    pub source: String,

    /// Opaque key/value payload.
    #[serde(default)]
    pub data: Map<String, JsonValue>,

    /// Per-process diagnostic counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
}

impl StandardEvent {
    /// Creates a new envelope with fresh event and correlation ids.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: Map<String, JsonValue>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            correlation_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Timestamp::now(),
            version: EVENT_SCHEMA_VERSION.to_string(),
            source: source.into(),
            data,
            sequence_number: None,
        }
    }

    /// Creates an envelope from any JSON value.
    ///
    /// Objects become `data` directly; any other value is stored under `value`.
    pub fn from_json(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        let data = match payload {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self::new(event_type, source, data)
    }

    /// Reuse an existing event id (retries of the same logical event).
    pub fn with_event_id(mut self, id: EventId) -> Self {
        self.event_id = id;
        self
    }

    /// Propagate a correlation id from an upstream request or event.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Checks the fields the bus relies on for routing and deduplication.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.as_str().trim().is_empty() {
            return Err(ValidationError::empty_field("eventId"));
        }
        if self.event_type.trim().is_empty() {
            return Err(ValidationError::empty_field("type"));
        }
        if self.event_type.chars().any(char::is_whitespace) {
            return Err(ValidationError::invalid_format("type", "contains whitespace"));
        }
        if self.source.trim().is_empty() {
            return Err(ValidationError::empty_field("source"));
        }
        Ok(())
    }

    /// Returns a payload field rendered as a string, if present and scalar.
    pub fn data_field(&self, field: &str) -> Option<String> {
        match self.data.get(field)? {
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Deserialize the payload into a typed structure.
    pub fn data_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(JsonValue::Object(self.data.clone()))
    }

    /// Whether this event is a dead-letter wrapper.
    pub fn is_dead_letter(&self) -> bool {
        self.event_type.ends_with(DEAD_LETTER_SUFFIX)
    }

    /// Wraps this event for the dead-letter destination.
    ///
    /// The wrapper keeps the identifiers of the original so it partitions and
    /// deduplicates the same way, and carries the full original envelope
    /// together with the error and the failure time.
    pub fn to_dead_letter(
        &self,
        error: &str,
        failed_at: Timestamp,
    ) -> Result<StandardEvent, serde_json::Error> {
        let mut data = Map::new();
        data.insert("originalEvent".to_string(), serde_json::to_value(self)?);
        data.insert("error".to_string(), JsonValue::String(error.to_string()));
        data.insert(
            "failedAt".to_string(),
            JsonValue::String(failed_at.to_rfc3339()),
        );

        Ok(StandardEvent {
            event_id: self.event_id.clone(),
            correlation_id: self.correlation_id.clone(),
            event_type: format!("{}{}", self.event_type, DEAD_LETTER_SUFFIX),
            timestamp: self.timestamp,
            version: self.version.clone(),
            source: self.source.clone(),
            data,
            sequence_number: None,
        })
    }

    /// Extracts the original envelope from a dead-letter wrapper.
    pub fn dead_letter_original(&self) -> Option<StandardEvent> {
        if !self.is_dead_letter() {
            return None;
        }
        let original = self.data.get("originalEvent")?;
        serde_json::from_value(original.clone()).ok()
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the JSON wire format.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
impl StandardEvent {
    /// Creates a test fixture StandardEvent for use in tests.
    pub fn test_fixture(event_type: &str) -> Self {
        Self::from_json(event_type, "test-service", serde_json::json!({"test": "data"}))
    }
}
