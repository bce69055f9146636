//! Presence and signaling coordination for group-based friend pings.
//!
//! Friends in a group each hold a distinct color, send color signals into
//! each other's queues, keep themselves alive with pings and choose a daily
//! window in which they can be reached.

pub mod common;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod presence;
pub mod storage;

pub use coordinator::Coordinator;
pub use error::{PresenceError, PresenceResult, StorageError};
