//! Durable tenant session state.
//!
//! A [`SessionRecord`] is the persisted truth for one tenant: lifecycle
//! status, bound device identity, webhook target, and event subscriptions.
//! The gateway core reads and updates records through the
//! [`SessionRepository`] trait; it never holds the authoritative copy.

pub mod record;
pub mod store;

pub use {
    record::{SessionRecord, SessionStatus},
    store::{MemorySessionRepository, SessionRepository, SqliteSessionRepository},
};
