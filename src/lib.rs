//! aiponge event bus - Inter-service events over Redis or Kafka
//!
//! Every service publishes `StandardEvent` envelopes through an
//! `EventTransport` and consumes them through the `IdempotentSubscriber`,
//! which deduplicates by event id, retries failed handlers and dead-letters
//! what never succeeds.
//!
//! Publishing is fire-and-forget: broker trouble shows up in
//! `PublishOutcome`, health detail and metrics, never as an error to the
//! caller.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
