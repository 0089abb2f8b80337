//! Tenant session registry.
//!
//! Every session is owned by its own actor task: provider callbacks and
//! caller requests arrive as commands on the session's channel and are
//! applied one at a time, while readers observe consistent snapshots through
//! a watch channel. Sessions never share a lock with each other.

pub mod actor;
pub mod error;
pub mod registry;
pub mod state;

pub use {
    actor::{ConnectedLease, SessionHandle},
    error::SessionError,
    registry::{ConnectOutcome, SessionRegistry},
    state::{SessionStatus, Transition},
};
