//! WhatsApp backend: a [`ChatProvider`](zapgate_channels::ChatProvider) that
//! drives a bridge sidecar over HTTP, plus the parser for the sidecar's
//! webhook events.
//!
//! Sidecar contract (all bodies JSON, `Authorization: Bearer` when a token is
//! configured):
//!
//! | call                                  | body            | reply                                  |
//! |---------------------------------------|-----------------|----------------------------------------|
//! | `POST /instances/{key}/exists`        | `{jid}`         | `{exists, jid?}`                       |
//! | `POST /instances/{key}/messages`      | `{jid, message}`| `{id}`                                 |
//! | `POST /instances/{key}/lid`           | `{lid}`         | `{phone?}`                             |
//! | `POST /instances/{key}/pair`          | -               | `{qr}` or `{status:"logged_in", phone}`|
//! | `POST /instances/{key}/disconnect`    | -               | -                                      |
//! | `DELETE /instances/{key}`             | -               | -                                      |
//!
//! `409` means the tenant has no live session on the sidecar.

pub mod bridge;
pub mod events;

pub use {bridge::BridgeProvider, events::parse_webhook};
