use {anyhow::Result, async_trait::async_trait, zapgate_common::InboundEvent};

/// A behavior invoked for inbound provider events of the kinds it was
/// registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name, used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &InboundEvent) -> Result<()>;
}
