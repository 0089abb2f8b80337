use std::{sync::Arc, time::Instant};

use {
    tracing::info,
    zapgate_auto_reply::AutoReplyHandler,
    zapgate_channels::{ChannelOutbound, ChatProvider},
    zapgate_common::{EventKind, InstanceKey},
    zapgate_config::ZapgateConfig,
    zapgate_phone::ResolutionEngine,
    zapgate_sessions::{SessionRegistry, SessionStatus},
};

use crate::{dispatcher::EventDispatcher, error::GatewayError, outbox::Outbox};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    pub started_at: Instant,
    pub provider: Arc<dyn ChatProvider>,
    pub sessions: Arc<SessionRegistry>,
    pub engine: Arc<ResolutionEngine>,
    pub outbox: Arc<Outbox>,
    pub dispatcher: Arc<EventDispatcher>,
}

impl GatewayState {
    pub fn new(config: &ZapgateConfig, provider: Arc<dyn ChatProvider>) -> Arc<Self> {
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&provider),
            config.sessions.clone(),
        ));
        let engine = Arc::new(ResolutionEngine::new(
            Arc::clone(&sessions),
            Arc::clone(&provider),
            &config.phone,
        ));
        let outbox = Arc::new(Outbox::new(
            Arc::clone(&engine),
            Arc::clone(&provider),
            config.sessions.send_timeout(),
        ));

        let mut dispatcher = EventDispatcher::new(Arc::clone(&sessions), Arc::clone(&engine));
        if config.auto_reply.enabled {
            let outbound: Arc<dyn ChannelOutbound> = outbox.clone();
            dispatcher.register(
                EventKind::MessageReceived,
                Arc::new(AutoReplyHandler::from_config(&config.auto_reply, outbound)),
            );
        } else {
            info!("auto-reply disabled");
        }

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            provider,
            sessions,
            engine,
            outbox,
            dispatcher: Arc::new(dispatcher),
        })
    }

    /// Disconnect a session and drop its cached resolutions.
    pub async fn disconnect(&self, key: &InstanceKey) -> Result<SessionStatus, GatewayError> {
        let status = self.sessions.disconnect(key).await?;
        self.engine.invalidate(key);
        Ok(status)
    }

    /// Delete a session along with its cache and event lane.
    pub async fn delete(&self, key: &InstanceKey) -> Result<SessionStatus, GatewayError> {
        let status = self.sessions.delete(key).await?;
        self.engine.invalidate(key);
        self.dispatcher.close_lane(key);
        Ok(status)
    }
}
