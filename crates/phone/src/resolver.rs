use std::{sync::Arc, time::Duration};

use {
    tracing::{debug, warn},
    zapgate_channels::{ChatProvider, ProviderError},
    zapgate_common::InstanceKey,
    zapgate_sessions::ConnectedLease,
};

use crate::{error::PhoneError, plan::Candidate};

/// Probes candidates against the provider, strictly one after another.
///
/// Order is part of the result: probing variants concurrently could let a
/// corrected form win over a still-valid original.
pub struct ExistenceResolver {
    provider: Arc<dyn ChatProvider>,
    probe_timeout: Duration,
}

impl ExistenceResolver {
    pub fn new(provider: Arc<dyn ChatProvider>, probe_timeout: Duration) -> Self {
        Self {
            provider,
            probe_timeout,
        }
    }

    /// Return the first candidate the network reports as existing.
    ///
    /// A timeout or transport failure on any but the last candidate counts as
    /// a miss. Cancellation of `lease` aborts the probe in flight.
    pub async fn resolve<'a>(
        &self,
        instance: &InstanceKey,
        candidates: &'a [Candidate],
        lease: &ConnectedLease,
    ) -> Result<&'a Candidate, PhoneError> {
        let Some(first) = candidates.first() else {
            return Err(PhoneError::NotFound(String::new()));
        };

        for (i, candidate) in candidates.iter().enumerate() {
            let is_last = i + 1 == candidates.len();
            let probe = tokio::time::timeout(
                self.probe_timeout,
                self.provider.exists(instance, &candidate.number),
            );

            let outcome = tokio::select! {
                biased;
                () = lease.cancelled() => {
                    debug!(instance = %instance, number = %candidate.number, "resolution cancelled");
                    return Err(PhoneError::SessionNotConnected(instance.clone()));
                }
                outcome = probe => outcome,
            };

            match outcome {
                Ok(Ok(true)) => {
                    debug!(instance = %instance, number = %candidate.number, rank = candidate.rank, "candidate exists");
                    return Ok(candidate);
                },
                Ok(Ok(false)) => {
                    debug!(instance = %instance, number = %candidate.number, rank = candidate.rank, "candidate not registered");
                },
                Ok(Err(ProviderError::NotConnected(_))) => {
                    return Err(PhoneError::SessionNotConnected(instance.clone()));
                },
                Ok(Err(e)) if is_last => return Err(PhoneError::Provider(e)),
                Ok(Err(e)) => {
                    warn!(instance = %instance, number = %candidate.number, error = %e, "probe failed, trying next candidate");
                },
                Err(_) if is_last => {
                    return Err(PhoneError::ResolutionTimeout(
                        candidate.number.digits().to_string(),
                    ));
                },
                Err(_) => {
                    warn!(instance = %instance, number = %candidate.number, timeout = ?self.probe_timeout, "probe timed out, trying next candidate");
                },
            }
        }

        Err(PhoneError::NotFound(first.number.digits().to_string()))
    }

    /// Ask the session's device store for the phone number behind `lid`.
    pub async fn lookup_lid(
        &self,
        instance: &InstanceKey,
        lid: &str,
        lease: &ConnectedLease,
    ) -> Result<String, PhoneError> {
        let lookup = tokio::time::timeout(
            self.probe_timeout,
            self.provider.lid_to_phone(instance, lid),
        );
        let outcome = tokio::select! {
            biased;
            () = lease.cancelled() => {
                return Err(PhoneError::SessionNotConnected(instance.clone()));
            }
            outcome = lookup => outcome,
        };

        match outcome {
            Ok(Ok(Some(phone))) => {
                debug!(instance = %instance, lid, phone = %phone, "linked identity mapped");
                Ok(phone)
            },
            Ok(Ok(None)) => Err(PhoneError::UnknownLid(lid.to_string())),
            Ok(Err(ProviderError::NotConnected(_))) => {
                Err(PhoneError::SessionNotConnected(instance.clone()))
            },
            Ok(Err(e)) => Err(PhoneError::Provider(e)),
            Err(_) => Err(PhoneError::ResolutionTimeout(lid.to_string())),
        }
    }
}
