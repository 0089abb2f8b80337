use zapgate_common::InstanceKey;

/// Session precondition failures. None of these are retryable without the
/// caller doing something first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("unknown instance '{0}'")]
    UnknownInstance(InstanceKey),
    #[error("instance '{0}' already exists")]
    DuplicateInstance(InstanceKey),
    #[error("instance '{0}' is already connected")]
    AlreadyConnected(InstanceKey),
    #[error("instance '{0}' has no pairing in progress")]
    NoPairingInProgress(InstanceKey),
    #[error("instance '{0}' produced no pairing code in time")]
    PairingTimeout(InstanceKey),
    #[error("instance '{0}' is not connected")]
    SessionNotConnected(InstanceKey),
}

impl SessionError {
    pub fn instance(&self) -> &InstanceKey {
        match self {
            Self::UnknownInstance(k)
            | Self::DuplicateInstance(k)
            | Self::AlreadyConnected(k)
            | Self::NoPairingInProgress(k)
            | Self::PairingTimeout(k)
            | Self::SessionNotConnected(k) => k,
        }
    }
}
