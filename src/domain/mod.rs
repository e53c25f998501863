//! Domain layer containing the event bus vocabulary.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (envelope, ids, timestamps, errors)
//! - `diagnostics` - Health and metrics snapshots reported by transports

pub mod diagnostics;
pub mod foundation;
