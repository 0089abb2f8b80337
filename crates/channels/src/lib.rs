//! Provider seam between the gateway and the chat network.
//!
//! A provider owns the network session (pairing, encryption, encoding) and
//! exposes existence checks, sends and pairing per tenant. Everything above
//! it talks to the network only through [`ChatProvider`].

pub mod handler;
pub mod memory;
pub mod outbound;
pub mod provider;

pub use {
    handler::EventHandler,
    memory::InMemoryProvider,
    outbound::{ChannelOutbound, SendReceipt},
    provider::{ChatProvider, PairingOutcome, ProviderError},
};
