use std::{collections::HashMap, sync::Arc};

use {
    dashmap::DashMap,
    serde::Serialize,
    tracing::{debug, info},
    zapgate_channels::ChatProvider,
    zapgate_common::{CanonicalNumber, InstanceKey},
    zapgate_config::PhoneConfig,
    zapgate_sessions::{ConnectedLease, SessionRegistry},
};

use crate::{
    error::PhoneError,
    normalize::{NumberNormalizer, lid_digits},
    plan::{Candidate, CandidateGenerator, Variation},
    resolver::ExistenceResolver,
};

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionResult {
    /// The number as the caller wrote it, normalized.
    pub original: CanonicalNumber,
    pub resolved: CanonicalNumber,
    pub matched_rank: u8,
    pub was_corrected: bool,
    pub variation: Variation,
}

/// A verified recipient plus the connected epoch it was verified under.
#[derive(Debug, Clone)]
pub struct SendTarget {
    pub recipient: CanonicalNumber,
    pub was_corrected: bool,
    pub lease: ConnectedLease,
}

#[derive(Default)]
struct SessionCache {
    epoch: u64,
    entries: HashMap<String, ResolutionResult>,
}

/// Normalizer → candidate generator → existence resolver, with a cache of
/// successful resolutions per connected session.
pub struct ResolutionEngine {
    sessions: Arc<SessionRegistry>,
    normalizer: NumberNormalizer,
    generator: CandidateGenerator,
    resolver: ExistenceResolver,
    cache: Option<DashMap<InstanceKey, SessionCache>>,
}

impl ResolutionEngine {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        provider: Arc<dyn ChatProvider>,
        config: &PhoneConfig,
    ) -> Self {
        Self {
            sessions,
            normalizer: NumberNormalizer::from_config(config),
            generator: CandidateGenerator::from_config(config),
            resolver: ExistenceResolver::new(provider, config.probe_timeout()),
            cache: config.cache.then(DashMap::new),
        }
    }

    /// Candidates for `raw`, without touching the network.
    pub fn plan(&self, raw: &str) -> Result<Vec<Candidate>, PhoneError> {
        let normalized = self.normalizer.normalize(raw)?;
        self.generator.candidates(&normalized)
    }

    /// Resolve `raw` to the number registered on the network. Sends nothing.
    pub async fn resolve(
        &self,
        instance: &InstanceKey,
        raw: &str,
    ) -> Result<ResolutionResult, PhoneError> {
        self.resolve_leased(instance, raw).await.map(|(result, _)| result)
    }

    /// Resolve `raw` for an outgoing message. Every send path goes through
    /// here so the provider never sees an unverified number.
    pub async fn resolve_for_send(
        &self,
        instance: &InstanceKey,
        raw: &str,
    ) -> Result<SendTarget, PhoneError> {
        let (result, lease) = self.resolve_leased(instance, raw).await?;
        Ok(SendTarget {
            recipient: result.resolved,
            was_corrected: result.was_corrected,
            lease,
        })
    }

    /// The phone number behind a linked identity (`<digits>@lid`), as known
    /// to `instance`'s session. Nothing is probed.
    pub async fn lid_to_phone(
        &self,
        instance: &InstanceKey,
        raw: &str,
    ) -> Result<CanonicalNumber, PhoneError> {
        let lease = self.sessions.get(instance)?.lease()?;
        let Some(lid) = lid_digits(raw)? else {
            return Err(PhoneError::invalid(raw, "not a linked identity"));
        };
        let phone = self.resolver.lookup_lid(instance, lid, &lease).await?;
        let normalized = self.normalizer.normalize(&phone)?;
        Ok(CanonicalNumber::new(normalized.digits))
    }

    /// Drop every cached resolution of `instance`.
    pub fn invalidate(&self, instance: &InstanceKey) {
        if let Some(cache) = &self.cache
            && cache.remove(instance).is_some()
        {
            debug!(instance = %instance, "resolution cache dropped");
        }
    }

    async fn resolve_leased(
        &self,
        instance: &InstanceKey,
        raw: &str,
    ) -> Result<(ResolutionResult, ConnectedLease), PhoneError> {
        let session = self.sessions.get(instance)?;
        let lease = session.lease()?;

        // Linked identities are mapped to their phone number first, then
        // resolved like any other number.
        let mapped;
        let raw = match lid_digits(raw)? {
            Some(lid) => {
                mapped = self.resolver.lookup_lid(instance, lid, &lease).await?;
                mapped.as_str()
            },
            None => raw,
        };

        let normalized = self.normalizer.normalize(raw)?;
        if let Some(hit) = self.cached(instance, lease.epoch(), &normalized.digits) {
            debug!(instance = %instance, number = %normalized.digits, "resolution cache hit");
            return Ok((hit, lease));
        }

        let candidates = self.generator.candidates(&normalized)?;
        let winner = self.resolver.resolve(instance, &candidates, &lease).await?;

        // The session may have dropped between the last probe and now.
        if !session.is_current(lease.epoch()) {
            return Err(PhoneError::SessionNotConnected(instance.clone()));
        }

        let result = ResolutionResult {
            original: candidates[0].number.clone(),
            resolved: winner.number.clone(),
            matched_rank: winner.rank,
            was_corrected: winner.variation != Variation::Original,
            variation: winner.variation,
        };
        if result.was_corrected {
            info!(
                instance = %instance,
                original = %result.original,
                resolved = %result.resolved,
                "number corrected"
            );
        }
        self.store(instance, lease.epoch(), &normalized.digits, &result);
        Ok((result, lease))
    }

    fn cached(&self, instance: &InstanceKey, epoch: u64, digits: &str) -> Option<ResolutionResult> {
        let entry = self.cache.as_ref()?.get(instance)?;
        (entry.epoch == epoch)
            .then(|| entry.entries.get(digits).cloned())
            .flatten()
    }

    fn store(&self, instance: &InstanceKey, epoch: u64, digits: &str, result: &ResolutionResult) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut entry = cache.entry(instance.clone()).or_default();
        if entry.epoch != epoch {
            entry.entries.clear();
            entry.epoch = epoch;
        }
        entry.entries.insert(digits.to_string(), result.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        super::*,
        rstest::rstest,
        zapgate_channels::InMemoryProvider,
        zapgate_config::SessionsConfig,
        zapgate_sessions::{SessionError, Transition},
    };

    struct Harness {
        provider: Arc<InMemoryProvider>,
        sessions: Arc<SessionRegistry>,
        engine: ResolutionEngine,
        key: InstanceKey,
    }

    async fn harness_with(config: PhoneConfig, contacts: &[&str]) -> Harness {
        let provider = Arc::new(InMemoryProvider::with_contacts(contacts.iter().copied()));
        let sessions = Arc::new(SessionRegistry::new(
            provider.clone(),
            SessionsConfig::default(),
        ));
        let engine = ResolutionEngine::new(sessions.clone(), provider.clone(), &config);
        let key = sessions.create(Some("t1".into())).unwrap();
        connect(&sessions, &key).await;
        Harness {
            provider,
            sessions,
            engine,
            key,
        }
    }

    async fn harness(contacts: &[&str]) -> Harness {
        harness_with(PhoneConfig::default(), contacts).await
    }

    async fn connect(sessions: &SessionRegistry, key: &InstanceKey) {
        sessions.connect(key).await.unwrap();
        sessions
            .apply(key, Transition::Connected { phone: None })
            .await
            .unwrap();
    }

    #[rstest]
    #[case::a_exists_verbatim("554191968071", &["554191968071"], "554191968071", 0, false)]
    #[case::b_marker_inserted("551288053918", &["5512988053918"], "5512988053918", 1, true)]
    #[case::c_marker_removed("5512988053918", &["551288053918"], "551288053918", 1, true)]
    #[case::d_landline("551123456789", &["551123456789"], "551123456789", 0, false)]
    #[case::foreign("447911123456", &["447911123456"], "447911123456", 0, false)]
    #[case::suffix_and_noise("+55 (12) 8805-3918@s.whatsapp.net", &["5512988053918"], "5512988053918", 1, true)]
    #[tokio::test]
    async fn resolves(
        #[case] raw: &str,
        #[case] contacts: &[&str],
        #[case] resolved: &str,
        #[case] rank: u8,
        #[case] corrected: bool,
    ) {
        let h = harness(contacts).await;
        let result = h.engine.resolve(&h.key, raw).await.unwrap();
        assert_eq!(result.resolved.digits(), resolved);
        assert_eq!(result.matched_rank, rank);
        assert_eq!(result.was_corrected, corrected);
        assert_eq!(result.was_corrected, result.resolved != result.original);
    }

    #[tokio::test]
    async fn original_is_always_probed_first() {
        // Both forms exist: the original must win.
        let h = harness(&["551288053918", "5512988053918"]).await;
        let result = h.engine.resolve(&h.key, "551288053918").await.unwrap();
        assert!(!result.was_corrected);
        assert_eq!(h.provider.probes(), vec!["551288053918"]);
    }

    #[tokio::test]
    async fn probes_run_in_rank_order() {
        let h = harness(&["5512988053918"]).await;
        h.engine.resolve(&h.key, "551288053918").await.unwrap();
        assert_eq!(h.provider.probes(), vec!["551288053918", "5512988053918"]);
    }

    #[tokio::test]
    async fn landline_is_probed_once() {
        let h = harness(&[]).await;
        let err = h.engine.resolve(&h.key, "551123456789").await.unwrap_err();
        assert!(matches!(err, PhoneError::NotFound(_)));
        assert_eq!(h.provider.probes(), vec!["551123456789"]);
    }

    #[tokio::test]
    async fn foreign_number_is_probed_once() {
        let h = harness(&[]).await;
        let err = h.engine.resolve(&h.key, "15551234567").await.unwrap_err();
        assert!(matches!(err, PhoneError::NotFound(_)));
        assert_eq!(h.provider.probes().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_plan_probes_nothing() {
        let h = harness(&[]).await;
        let err = h.engine.resolve(&h.key, "1234567890").await.unwrap_err();
        assert!(matches!(err, PhoneError::UnsupportedPlan { .. }));
        assert!(h.provider.probes().is_empty());
    }

    #[tokio::test]
    async fn session_must_be_connected() {
        let h = harness(&[]).await;
        let idle = h.sessions.create(Some("idle".into())).unwrap();
        // The precondition is checked before the number is even parsed.
        let err = h.engine.resolve(&idle, "not a number").await.unwrap_err();
        assert!(matches!(err, PhoneError::SessionNotConnected(_)));

        let err = h.engine.resolve(&"ghost".into(), "554191968071").await.unwrap_err();
        assert!(matches!(
            err,
            PhoneError::Session(SessionError::UnknownInstance(_))
        ));
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let config = PhoneConfig {
            cache: false,
            ..PhoneConfig::default()
        };
        let h = harness_with(config, &["5512988053918"]).await;
        let first = h.engine.resolve(&h.key, "551288053918").await.unwrap();
        let second = h.engine.resolve(&h.key, "551288053918").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.provider.probes().len(), 4);
    }

    #[tokio::test]
    async fn cache_hits_skip_probing() {
        let h = harness(&["5512988053918"]).await;
        let first = h.engine.resolve(&h.key, "551288053918").await.unwrap();
        h.provider.clear_probes();

        let second = h.engine.resolve(&h.key, "55 12 8805-3918").await.unwrap();
        assert_eq!(first, second);
        assert!(h.provider.probes().is_empty());
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let h = harness(&[]).await;
        assert!(h.engine.resolve(&h.key, "551288053918").await.is_err());
        h.provider.add_contact("5512988053918");
        let result = h.engine.resolve(&h.key, "551288053918").await.unwrap();
        assert!(result.was_corrected);
    }

    #[tokio::test]
    async fn reconnect_drops_cached_resolutions() {
        let h = harness(&["5512988053918"]).await;
        h.engine.resolve(&h.key, "551288053918").await.unwrap();

        h.sessions.disconnect(&h.key).await.unwrap();
        connect(&h.sessions, &h.key).await;

        // The directory changed while disconnected; a stale cache would miss it.
        h.provider.remove_contact("5512988053918");
        h.provider.add_contact("551288053918");
        h.provider.clear_probes();
        let result = h.engine.resolve(&h.key, "551288053918").await.unwrap();
        assert!(!result.was_corrected);
        assert_eq!(h.provider.probes(), vec!["551288053918"]);
    }

    #[tokio::test]
    async fn invalidate_clears_cache() {
        let h = harness(&["554191968071"]).await;
        h.engine.resolve(&h.key, "554191968071").await.unwrap();
        h.engine.invalidate(&h.key);
        h.provider.clear_probes();
        h.engine.resolve(&h.key, "554191968071").await.unwrap();
        assert_eq!(h.provider.probes().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_mid_resolution_fails_and_invalidates() {
        let h = Arc::new(harness(&["5512988053918"]).await);
        h.provider
            .set_probe_delay("551288053918", Duration::from_millis(500));

        let task = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.engine.resolve(&h.key, "551288053918").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.sessions.disconnect(&h.key).await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, PhoneError::SessionNotConnected(_)));

        // Nothing from the cancelled run may have been cached.
        connect(&h.sessions, &h.key).await;
        h.provider.clear_probes();
        h.provider.set_probe_delay("551288053918", Duration::ZERO);
        h.engine.resolve(&h.key, "551288053918").await.unwrap();
        assert_eq!(h.provider.probes().len(), 2);
    }

    #[tokio::test]
    async fn slow_probe_is_a_miss_unless_last() {
        let config = PhoneConfig {
            probe_timeout_ms: 50,
            ..PhoneConfig::default()
        };
        let h = harness_with(config, &["551288053918", "5512988053918"]).await;

        h.provider
            .set_probe_delay("551288053918", Duration::from_millis(300));
        let result = h.engine.resolve(&h.key, "551288053918").await.unwrap();
        assert_eq!(result.resolved.digits(), "5512988053918");

        h.provider
            .set_probe_delay("5541991968071", Duration::from_millis(300));
        let err = h.engine.resolve(&h.key, "554191968071").await.unwrap_err();
        assert!(matches!(err, PhoneError::ResolutionTimeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn transport_errors() {
        let h = harness(&["5512988053918"]).await;
        h.provider.break_probe("551288053918");
        let result = h.engine.resolve(&h.key, "551288053918").await.unwrap();
        assert_eq!(result.resolved.digits(), "5512988053918");

        h.provider.break_probe("551123456789");
        let err = h.engine.resolve(&h.key, "551123456789").await.unwrap_err();
        assert!(matches!(err, PhoneError::Provider(_)));
    }

    #[tokio::test]
    async fn resolve_for_send_carries_lease() {
        let h = harness(&["5512988053918"]).await;
        let target = h.engine.resolve_for_send(&h.key, "551288053918").await.unwrap();
        assert_eq!(target.recipient.digits(), "5512988053918");
        assert!(target.was_corrected);
        assert_eq!(target.lease.epoch(), 0);
        assert!(!target.lease.is_cancelled());
    }

    #[test]
    fn plan_lists_candidates_offline() {
        let provider = Arc::new(InMemoryProvider::new());
        let sessions = Arc::new(SessionRegistry::new(
            provider.clone(),
            SessionsConfig::default(),
        ));
        let engine = ResolutionEngine::new(sessions, provider, &PhoneConfig::default());
        let plan = engine.plan("551288053918").unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[tokio::test]
    async fn linked_identity_resolves_through_its_phone() {
        let h = harness(&["5512988053918"]).await;
        h.provider.map_lid("123456789012345", "551288053918@s.whatsapp.net");

        let result = h
            .engine
            .resolve(&h.key, "123456789012345@lid")
            .await
            .unwrap();
        assert_eq!(result.resolved.digits(), "5512988053918");
        assert!(result.was_corrected);

        let phone = h
            .engine
            .lid_to_phone(&h.key, "123456789012345@lid")
            .await
            .unwrap();
        assert_eq!(phone.digits(), "551288053918");
    }

    #[tokio::test]
    async fn unmapped_or_malformed_linked_identity() {
        let h = harness(&["5512988053918"]).await;
        assert!(matches!(
            h.engine.resolve(&h.key, "777@lid").await,
            Err(PhoneError::UnknownLid(lid)) if lid == "777"
        ));
        assert!(matches!(
            h.engine.lid_to_phone(&h.key, "5512988053918").await,
            Err(PhoneError::InvalidFormat { .. })
        ));
        assert!(h.provider.probes().is_empty());
    }

    #[tokio::test]
    async fn linked_identity_needs_connected_session() {
        let h = harness(&[]).await;
        h.provider.map_lid("42", "5512988053918");
        h.sessions.disconnect(&h.key).await.unwrap();
        assert!(matches!(
            h.engine.lid_to_phone(&h.key, "42@lid").await,
            Err(PhoneError::SessionNotConnected(_))
        ));
    }
}
