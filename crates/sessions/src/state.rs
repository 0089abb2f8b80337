//! Session state machine.
//!
//! `Created → Connecting → AwaitingScan → Connected → Disconnected → Connecting → …`
//!
//! The epoch counts how many times the session has left `Connected`; work
//! started under one epoch is stale under the next.

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    zapgate_common::{ConnectionState, InstanceKey},
};

use crate::error::SessionError;

/// Consistent view of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub instance_key: InstanceKey,
    pub state: ConnectionState,
    /// Set only while connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_identity: Option<String>,
    /// QR payload; present only while pairing.
    #[serde(skip)]
    pub pairing_artifact: Option<String>,
    pub epoch: u64,
    /// Why the session last failed or dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inputs to the state machine: caller requests and provider callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    ConnectRequested,
    PairingIssued(String),
    PairingFailed(String),
    Connected { phone: Option<String> },
    Disconnected { reason: String },
}

impl SessionStatus {
    pub fn new(instance_key: InstanceKey) -> Self {
        let now = Utc::now();
        Self {
            instance_key,
            state: ConnectionState::Created,
            phone_identity: None,
            pairing_artifact: None,
            epoch: 0,
            detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Apply a transition. `Ok(false)` means it was valid but had no effect
    /// (a stale or repeated callback).
    pub fn apply(&mut self, transition: &Transition) -> Result<bool, SessionError> {
        use ConnectionState as S;

        let next = match (self.state, transition) {
            (S::Connected, Transition::ConnectRequested) => {
                return Err(SessionError::AlreadyConnected(self.instance_key.clone()));
            },
            (S::Connecting | S::AwaitingScan, Transition::ConnectRequested) => return Ok(false),
            (S::Created | S::Disconnected, Transition::ConnectRequested) => {
                self.pairing_artifact = None;
                self.detail = None;
                S::Connecting
            },

            (S::Connecting | S::AwaitingScan, Transition::PairingIssued(qr)) => {
                self.pairing_artifact = Some(qr.clone());
                S::AwaitingScan
            },
            (_, Transition::PairingIssued(_)) => return Ok(false),

            (S::Connecting | S::AwaitingScan, Transition::PairingFailed(reason)) => {
                self.pairing_artifact = None;
                self.detail = Some(reason.clone());
                S::Disconnected
            },
            (_, Transition::PairingFailed(_)) => return Ok(false),

            (S::Connected, Transition::Connected { phone }) => {
                if phone.is_none() || self.phone_identity == *phone {
                    return Ok(false);
                }
                self.phone_identity = phone.clone();
                S::Connected
            },
            (_, Transition::Connected { phone }) => {
                self.phone_identity = phone.clone();
                self.pairing_artifact = None;
                self.detail = None;
                S::Connected
            },

            (S::Created | S::Disconnected, Transition::Disconnected { .. }) => return Ok(false),
            (was, Transition::Disconnected { reason }) => {
                if was == S::Connected {
                    self.epoch += 1;
                }
                self.phone_identity = None;
                self.pairing_artifact = None;
                self.detail = Some(reason.clone());
                S::Disconnected
            },
        };

        self.state = next;
        self.updated_at = Utc::now();
        Ok(true)
    }
}
