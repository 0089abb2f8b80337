//! In-process provider backed by a shared contact directory.
//!
//! Used for local development (`provider.kind = "memory"`) and by tests,
//! which rely on its probe and send logs to observe ordering.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tracing::debug,
    zapgate_common::{CanonicalNumber, DeliveryId, InstanceKey, OutboundMessage},
};

use crate::provider::{ChatProvider, PairingOutcome, ProviderError};

/// How `pair` behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingMode {
    Qr,
    AlreadyPaired(String),
    Fail(String),
}

/// A message accepted by the in-memory provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub instance: InstanceKey,
    pub to: CanonicalNumber,
    pub message: OutboundMessage,
    pub delivery_id: DeliveryId,
}

#[derive(Default)]
struct Inner {
    contacts: HashSet<String>,
    delays: HashMap<String, Duration>,
    broken: HashSet<String>,
    lids: HashMap<String, String>,
    probes: Vec<(InstanceKey, String)>,
    sent: Vec<SentMessage>,
    reject_sends: bool,
}

pub struct InMemoryProvider {
    inner: Mutex<Inner>,
    pairing: Mutex<PairingMode>,
    pair_seq: AtomicU64,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pairing: Mutex::new(PairingMode::Qr),
            pair_seq: AtomicU64::new(0),
        }
    }

    pub fn with_contacts<I, S>(contacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        provider.lock().contacts = contacts.into_iter().map(Into::into).collect();
        provider
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_contact(&self, digits: impl Into<String>) {
        self.lock().contacts.insert(digits.into());
    }

    pub fn remove_contact(&self, digits: &str) {
        self.lock().contacts.remove(digits);
    }

    /// Delay every existence probe of `digits` by `delay`.
    pub fn set_probe_delay(&self, digits: impl Into<String>, delay: Duration) {
        self.lock().delays.insert(digits.into(), delay);
    }

    /// Make probes of `digits` fail with a transport error.
    pub fn break_probe(&self, digits: impl Into<String>) {
        self.lock().broken.insert(digits.into());
    }

    /// Make `lid` resolve to `phone`.
    pub fn map_lid(&self, lid: impl Into<String>, phone: impl Into<String>) {
        self.lock().lids.insert(lid.into(), phone.into());
    }

    pub fn set_reject_sends(&self, reject: bool) {
        self.lock().reject_sends = reject;
    }

    pub fn set_pairing(&self, mode: PairingMode) {
        *self.pairing.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Digits probed so far, in call order.
    pub fn probes(&self) -> Vec<String> {
        self.lock().probes.iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn clear_probes(&self) {
        self.lock().probes.clear();
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }
}

#[async_trait]
impl ChatProvider for InMemoryProvider {
    fn id(&self) -> &str {
        "memory"
    }

    async fn exists(
        &self,
        instance: &InstanceKey,
        number: &CanonicalNumber,
    ) -> Result<bool, ProviderError> {
        let delay = {
            let mut inner = self.lock();
            inner
                .probes
                .push((instance.clone(), number.digits().to_string()));
            inner.delays.get(number.digits()).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.lock();
        if inner.broken.contains(number.digits()) {
            return Err(ProviderError::Transport(format!(
                "probe of {number} failed"
            )));
        }
        let found = inner.contacts.contains(number.digits());
        debug!(instance = %instance, number = %number, found, "memory provider probe");
        Ok(found)
    }

    async fn send(
        &self,
        instance: &InstanceKey,
        to: &CanonicalNumber,
        message: &OutboundMessage,
    ) -> Result<DeliveryId, ProviderError> {
        let mut inner = self.lock();
        if inner.reject_sends {
            return Err(ProviderError::Rejected(format!("send to {to} refused")));
        }
        let delivery_id = DeliveryId(uuid::Uuid::new_v4().simple().to_string().to_uppercase());
        inner.sent.push(SentMessage {
            instance: instance.clone(),
            to: to.clone(),
            message: message.clone(),
            delivery_id: delivery_id.clone(),
        });
        Ok(delivery_id)
    }

    async fn lid_to_phone(
        &self,
        _instance: &InstanceKey,
        lid: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(self.lock().lids.get(lid).cloned())
    }

    async fn pair(&self, instance: &InstanceKey) -> Result<PairingOutcome, ProviderError> {
        let mode = self
            .pairing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match mode {
            PairingMode::Qr => {
                let n = self.pair_seq.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(PairingOutcome::Qr(format!("2@memory,{instance},{n}")))
            },
            PairingMode::AlreadyPaired(phone) => Ok(PairingOutcome::AlreadyPaired { phone }),
            PairingMode::Fail(reason) => Err(ProviderError::Transport(reason)),
        }
    }
}
