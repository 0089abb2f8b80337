//! Shared domain types used across zapgate crates.

pub mod types;

pub use types::{
    CanonicalNumber, ConnectionState, DeliveryId, EventKind, InboundEvent, InstanceKey,
    MediaKind, OutboundMessage, ReplyButton,
};
