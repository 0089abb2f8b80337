use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    serde::Serialize,
    tracing::{info, warn},
    zapgate_channels::ChatProvider,
    zapgate_common::InstanceKey,
    zapgate_config::SessionsConfig,
};

use crate::{
    actor::{self, SessionHandle},
    error::SessionError,
    state::{SessionStatus, Transition},
};

/// Result of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// A new pairing attempt was started.
    PairingStarted,
    /// A pairing attempt was already running; nothing new was started.
    AlreadyPairing,
}

/// All tenant sessions, keyed by instance key.
pub struct SessionRegistry {
    sessions: DashMap<InstanceKey, SessionHandle>,
    next_seq: AtomicU64,
    provider: Arc<dyn ChatProvider>,
    config: SessionsConfig,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn ChatProvider>, config: SessionsConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            next_seq: AtomicU64::new(0),
            provider,
            config,
        }
    }

    /// Register a session in `Created`. A caller-chosen key must be unused;
    /// without one a fresh key is generated.
    pub fn create(&self, requested: Option<InstanceKey>) -> Result<InstanceKey, SessionError> {
        let key = requested.unwrap_or_else(InstanceKey::generate);
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(_) => Err(SessionError::DuplicateInstance(key)),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(actor::spawn(
                    key.clone(),
                    seq,
                    Arc::clone(&self.provider),
                    self.config.pairing_timeout(),
                ));
                info!(instance = %key, "session created");
                Ok(key)
            },
        }
    }

    pub fn get(&self, key: &InstanceKey) -> Result<SessionHandle, SessionError> {
        self.sessions
            .get(key)
            .map(|h| h.value().clone())
            .ok_or_else(|| SessionError::UnknownInstance(key.clone()))
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Begin pairing. Fails with `AlreadyConnected` when connected; a second
    /// call while pairing is a no-op.
    pub async fn connect(&self, key: &InstanceKey) -> Result<ConnectOutcome, SessionError> {
        self.get(key)?.connect().await
    }

    /// Current pairing artifact, waiting up to the configured QR wait for
    /// the provider to issue one.
    pub async fn qr(&self, key: &InstanceKey) -> Result<String, SessionError> {
        let handle = self.get(key)?;
        let status = handle.status();
        if !status.state.is_pairing() {
            return Err(SessionError::NoPairingInProgress(key.clone()));
        }
        if let Some(artifact) = status.pairing_artifact {
            return Ok(artifact);
        }
        handle.wait_for_artifact(self.config.qr_wait()).await
    }

    pub fn status(&self, key: &InstanceKey) -> Result<SessionStatus, SessionError> {
        Ok(self.get(key)?.status())
    }

    /// Snapshot of every session, in creation order.
    pub fn list(&self) -> Vec<SessionStatus> {
        let mut handles: Vec<SessionHandle> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        handles.sort_by_key(SessionHandle::seq);
        handles.iter().map(SessionHandle::status).collect()
    }

    /// Feed a provider callback into the session's state machine.
    pub async fn apply(
        &self,
        key: &InstanceKey,
        transition: Transition,
    ) -> Result<bool, SessionError> {
        self.get(key)?.apply(transition).await
    }

    /// Drop the network session but keep the registration.
    pub async fn disconnect(&self, key: &InstanceKey) -> Result<SessionStatus, SessionError> {
        let handle = self.get(key)?;
        handle
            .apply(Transition::Disconnected {
                reason: "disconnected by request".into(),
            })
            .await?;
        if let Err(e) = self.provider.disconnect(key).await {
            warn!(instance = %key, error = %e, "provider disconnect failed");
        }
        Ok(handle.status())
    }

    /// Remove the session entirely and release its provider resources.
    pub async fn delete(&self, key: &InstanceKey) -> Result<SessionStatus, SessionError> {
        let (_, handle) = self
            .sessions
            .remove(key)
            .ok_or_else(|| SessionError::UnknownInstance(key.clone()))?;
        let last = handle.status();
        handle.shutdown();
        if let Err(e) = self.provider.forget(key).await {
            warn!(instance = %key, error = %e, "provider forget failed");
        }
        info!(instance = %key, "session deleted");
        Ok(last)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        super::*,
        zapgate_channels::{InMemoryProvider, memory::PairingMode},
        zapgate_common::ConnectionState,
    };

    fn config() -> SessionsConfig {
        SessionsConfig {
            pairing_timeout_ms: 1_000,
            qr_wait_ms: 200,
            send_timeout_ms: 1_000,
        }
    }

    fn registry() -> (Arc<InMemoryProvider>, SessionRegistry) {
        let provider = Arc::new(InMemoryProvider::new());
        let registry = SessionRegistry::new(provider.clone(), config());
        (provider, registry)
    }

    async fn connect_fully(registry: &SessionRegistry, key: &InstanceKey) {
        registry.connect(key).await.unwrap();
        registry.qr(key).await.unwrap();
        registry
            .apply(key, Transition::Connected {
                phone: Some("5511999990000".into()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_generates_and_rejects_duplicates() {
        let (_, registry) = registry();
        let generated = registry.create(None).unwrap();
        assert_eq!(generated.as_str().len(), 32);

        let chosen = registry.create(Some("acme".into())).unwrap();
        assert_eq!(chosen.as_str(), "acme");
        assert_eq!(
            registry.create(Some("acme".into())),
            Err(SessionError::DuplicateInstance("acme".into()))
        );
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.status(&chosen).unwrap().state,
            ConnectionState::Created
        );
    }

    #[tokio::test]
    async fn unknown_instance() {
        let (_, registry) = registry();
        let key = InstanceKey::new("ghost");
        assert_eq!(
            registry.connect(&key).await,
            Err(SessionError::UnknownInstance(key.clone()))
        );
        assert!(registry.status(&key).is_err());
        assert!(registry.delete(&key).await.is_err());
    }

    #[tokio::test]
    async fn connect_then_qr() {
        let (_, registry) = registry();
        let key = registry.create(Some("t1".into())).unwrap();

        assert_eq!(
            registry.connect(&key).await.unwrap(),
            ConnectOutcome::PairingStarted
        );
        let qr = registry.qr(&key).await.unwrap();
        assert_eq!(qr, "2@memory,t1,1");
        assert_eq!(
            registry.status(&key).unwrap().state,
            ConnectionState::AwaitingScan
        );

        // Still pairing: a second connect starts nothing new.
        assert_eq!(
            registry.connect(&key).await.unwrap(),
            ConnectOutcome::AlreadyPairing
        );
        assert_eq!(registry.qr(&key).await.unwrap(), qr);
    }

    #[tokio::test]
    async fn qr_without_pairing() {
        let (_, registry) = registry();
        let key = registry.create(None).unwrap();
        assert_eq!(
            registry.qr(&key).await,
            Err(SessionError::NoPairingInProgress(key.clone()))
        );
    }

    #[tokio::test]
    async fn already_paired_device_connects_directly() {
        let (provider, registry) = registry();
        provider.set_pairing(PairingMode::AlreadyPaired("5541991968071".into()));
        let key = registry.create(None).unwrap();
        registry.connect(&key).await.unwrap();

        let handle = registry.get(&key).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.status().is_connected() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            handle.status().phone_identity.as_deref(),
            Some("5541991968071")
        );
    }

    #[tokio::test]
    async fn failed_pairing_lands_in_disconnected() {
        let (provider, registry) = registry();
        provider.set_pairing(PairingMode::Fail("bridge offline".into()));
        let key = registry.create(None).unwrap();
        registry.connect(&key).await.unwrap();

        assert_eq!(
            registry.qr(&key).await,
            Err(SessionError::NoPairingInProgress(key.clone()))
        );
        let status = registry.status(&key).unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.detail.unwrap().contains("bridge offline"));
    }

    #[tokio::test]
    async fn connect_when_connected_fails() {
        let (_, registry) = registry();
        let key = registry.create(None).unwrap();
        connect_fully(&registry, &key).await;
        assert_eq!(
            registry.connect(&key).await,
            Err(SessionError::AlreadyConnected(key.clone()))
        );
    }

    #[tokio::test]
    async fn lease_is_cancelled_on_disconnect() {
        let (_, registry) = registry();
        let key = registry.create(None).unwrap();
        let handle = registry.get(&key).unwrap();
        assert!(matches!(handle.lease(), Err(SessionError::SessionNotConnected(_))));

        connect_fully(&registry, &key).await;
        let lease = handle.lease().unwrap();
        assert_eq!(lease.epoch(), 0);
        assert!(handle.is_current(0));

        let status = registry.disconnect(&key).await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.epoch, 1);
        assert!(lease.is_cancelled());
        assert!(!handle.is_current(0));

        // Reconnecting issues a fresh, uncancelled lease.
        connect_fully(&registry, &key).await;
        let lease = handle.lease().unwrap();
        assert_eq!(lease.epoch(), 1);
        assert!(!lease.is_cancelled());
    }

    #[tokio::test]
    async fn list_is_in_creation_order() {
        let (_, registry) = registry();
        for name in ["c", "a", "b"] {
            registry.create(Some(name.into())).unwrap();
        }
        let keys: Vec<String> = registry
            .list()
            .into_iter()
            .map(|s| s.instance_key.to_string())
            .collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn delete_removes_and_cancels() {
        let (_, registry) = registry();
        let key = registry.create(None).unwrap();
        connect_fully(&registry, &key).await;
        let handle = registry.get(&key).unwrap();
        let lease = handle.lease().unwrap();

        let last = registry.delete(&key).await.unwrap();
        assert_eq!(last.state, ConnectionState::Connected);
        assert!(!registry.contains(&key));
        assert!(registry.is_empty());

        tokio::time::timeout(Duration::from_secs(1), lease.cancelled())
            .await
            .unwrap();
        assert!(handle.lease().is_err());
    }

    #[tokio::test]
    async fn sessions_do_not_interfere() {
        let (_, registry) = registry();
        let a = registry.create(Some("a".into())).unwrap();
        let b = registry.create(Some("b".into())).unwrap();
        connect_fully(&registry, &a).await;
        registry.connect(&b).await.unwrap();

        registry.disconnect(&b).await.unwrap();
        assert!(registry.status(&a).unwrap().is_connected());
        assert_eq!(
            registry.status(&b).unwrap().state,
            ConnectionState::Disconnected
        );
    }
}
