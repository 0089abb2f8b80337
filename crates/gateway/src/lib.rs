//! Gateway: HTTP surface over sessions, number resolution and provider events.
//!
//! Lifecycle:
//! 1. Load config and pick a provider
//! 2. Build [`GatewayState`](state::GatewayState): session registry, resolution engine, outbox
//! 3. Register event handlers on the dispatcher
//! 4. Serve the REST API and the provider webhook sink
//!
//! Number resolution and session state live in their own crates; this crate
//! only wires them together and maps their errors onto HTTP.

pub mod dispatcher;
pub mod error;
pub mod outbox;
pub mod server;
pub mod state;

pub use {
    dispatcher::{DispatchError, DispatchReport, EventDispatcher},
    error::GatewayError,
    outbox::Outbox,
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
