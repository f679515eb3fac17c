//! Shared types for the waygate workspace.
//!
//! Canonical event names, the envelope passed from the event processor to
//! dispatch sinks, and the error taxonomy every crate speaks.

pub mod error;
pub mod event;

pub use {
    error::GatewayError,
    event::{EventEnvelope, MediaRef, NormalizedMessage, events},
};
