//! Foundation module - Shared domain primitives.
//!
//! Contains the event envelope, identifiers, timestamps and error types
//! that form the vocabulary of the event bus.

mod errors;
mod events;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use events::{EventId, StandardEvent, DEAD_LETTER_SUFFIX, EVENT_SCHEMA_VERSION};
pub use timestamp::Timestamp;
