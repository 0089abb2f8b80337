use {
    anyhow::Result,
    async_trait::async_trait,
    serde::Serialize,
    zapgate_common::{CanonicalNumber, DeliveryId, InstanceKey, OutboundMessage},
};

/// What the caller gets back after a resolve-and-send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub delivery_id: DeliveryId,
    /// The verified number the message was actually sent to.
    pub recipient: CanonicalNumber,
}

/// Send messages to raw (unverified) recipients on behalf of a tenant.
///
/// Implementations resolve the recipient before handing anything to the
/// provider.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, instance: &InstanceKey, to: &str, text: &str)
    -> Result<SendReceipt>;

    async fn send_message(
        &self,
        instance: &InstanceKey,
        to: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt>;
}
