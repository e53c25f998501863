//! Application layer - The event bus as a service sees it.
//!
//! `EventBusClient` ties a transport to the idempotent subscriber and stamps
//! outgoing events with the service identity.

pub mod event_bus_client;

pub use event_bus_client::EventBusClient;
