use {
    async_trait::async_trait,
    zapgate_common::{CanonicalNumber, DeliveryId, InstanceKey, OutboundMessage},
};

/// Failures reported by a provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider has no live network session for this tenant.
    #[error("provider session for '{0}' is not connected")]
    NotConnected(InstanceKey),
    /// The network refused the request (bad recipient, blocked, etc.).
    #[error("rejected by the network: {0}")]
    Rejected(String),
    /// The provider could not be reached or answered garbage.
    #[error("provider transport error: {0}")]
    Transport(String),
}

/// Result of asking the provider to pair a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// A QR payload the user must scan.
    Qr(String),
    /// The device store is already logged in; no scan needed.
    AlreadyPaired { phone: String },
}

/// Core provider trait. One implementation per network backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Backend identifier (e.g. "bridge", "memory").
    fn id(&self) -> &str;

    /// Whether `number` is a reachable contact for this tenant's session.
    async fn exists(
        &self,
        instance: &InstanceKey,
        number: &CanonicalNumber,
    ) -> Result<bool, ProviderError>;

    /// Deliver a message to a verified number.
    async fn send(
        &self,
        instance: &InstanceKey,
        to: &CanonicalNumber,
        message: &OutboundMessage,
    ) -> Result<DeliveryId, ProviderError>;

    /// Start pairing the tenant's device.
    async fn pair(&self, instance: &InstanceKey) -> Result<PairingOutcome, ProviderError>;

    /// Phone number behind a linked identity (the digits of a `…@lid` jid),
    /// when the tenant's device store knows it.
    async fn lid_to_phone(
        &self,
        _instance: &InstanceKey,
        _lid: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }

    /// Drop the live network link, keeping the device store.
    async fn disconnect(&self, _instance: &InstanceKey) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Forget the tenant entirely (logout, drop device store).
    async fn forget(&self, _instance: &InstanceKey) -> Result<(), ProviderError> {
        Ok(())
    }
}
