//! Inbound event dispatch.
//!
//! Events are routed to handlers through a table keyed by [`EventKind`].
//! Lifecycle events are applied to the owning session before any handler
//! sees them. Events arriving through [`EventDispatcher::submit`] are queued
//! on a per-tenant lane so tenants never wait on each other while each
//! tenant's events keep their arrival order.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
};

use {
    dashmap::DashMap,
    futures::FutureExt,
    serde::Serialize,
    tokio::sync::mpsc,
    tracing::{debug, error, warn},
    zapgate_channels::EventHandler,
    zapgate_common::{EventKind, InboundEvent, InstanceKey},
    zapgate_phone::ResolutionEngine,
    zapgate_sessions::{SessionRegistry, Transition},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("event for unknown tenant '{0}'")]
    UnknownTenantEvent(InstanceKey),
}

/// How the handlers for one event fared.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub handled: usize,
    pub failed: usize,
}

pub struct EventDispatcher {
    sessions: Arc<SessionRegistry>,
    engine: Arc<ResolutionEngine>,
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    lanes: DashMap<InstanceKey, mpsc::UnboundedSender<InboundEvent>>,
}

impl EventDispatcher {
    pub fn new(sessions: Arc<SessionRegistry>, engine: Arc<ResolutionEngine>) -> Self {
        Self {
            sessions,
            engine,
            handlers: HashMap::new(),
            lanes: DashMap::new(),
        }
    }

    /// Add a handler for `kind`. Handlers run in registration order.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        debug!(kind = %kind, handler = handler.name(), "event handler registered");
        self.handlers.entry(kind).or_default().push(handler);
    }

    pub fn handler_names(&self, kind: EventKind) -> Vec<&str> {
        self.handlers
            .get(&kind)
            .map(|hs| hs.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    /// Dispatch one event now, on the caller's task.
    ///
    /// Handler failures (errors and panics) are logged and counted, never
    /// propagated.
    pub async fn dispatch(&self, event: &InboundEvent) -> Result<DispatchReport, DispatchError> {
        if !self.sessions.contains(&event.tenant) {
            warn!(tenant = %event.tenant, kind = %event.kind, "event for unknown tenant, discarding");
            return Err(DispatchError::UnknownTenantEvent(event.tenant.clone()));
        }

        self.apply_lifecycle(event).await;

        let mut report = DispatchReport::default();
        let Some(handlers) = self.handlers.get(&event.kind) else {
            return Ok(report);
        };
        for handler in handlers {
            match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(())) => report.handled += 1,
                Ok(Err(e)) => {
                    warn!(
                        tenant = %event.tenant,
                        handler = handler.name(),
                        error = %format!("{e:#}"),
                        "event handler failed"
                    );
                    report.failed += 1;
                },
                Err(_) => {
                    error!(tenant = %event.tenant, handler = handler.name(), "event handler panicked");
                    report.failed += 1;
                },
            }
        }
        debug!(tenant = %event.tenant, kind = %event.kind, handled = report.handled, failed = report.failed, "event dispatched");
        Ok(report)
    }

    /// Queue an event on its tenant's lane.
    ///
    /// Events for tenants the registry does not know are refused here so
    /// they never get a lane of their own.
    pub fn submit(self: &Arc<Self>, event: InboundEvent) -> Result<(), DispatchError> {
        let tenant = event.tenant.clone();
        if !self.sessions.contains(&tenant) {
            warn!(tenant = %tenant, kind = %event.kind, "event for unknown tenant, discarding");
            return Err(DispatchError::UnknownTenantEvent(tenant));
        }

        let lane = self
            .lanes
            .entry(tenant.clone())
            .or_insert_with(|| self.spawn_lane(tenant.clone()))
            .clone();

        // A closed lane means its worker is gone; start a fresh one.
        if let Err(mpsc::error::SendError(event)) = lane.send(event) {
            let lane = self.spawn_lane(tenant.clone());
            let _ = lane.send(event);
            self.lanes.insert(tenant, lane);
        }
        Ok(())
    }

    /// Stop accepting events for `tenant`. Already queued events still run.
    pub fn close_lane(&self, tenant: &InstanceKey) {
        self.lanes.remove(tenant);
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn spawn_lane(self: &Arc<Self>, tenant: InstanceKey) -> mpsc::UnboundedSender<InboundEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
        let own = tx.downgrade();
        let dispatcher: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            debug!(tenant = %tenant, "event lane opened");
            while let Some(event) = rx.recv().await {
                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };
                // The tenant went away with events still queued. Drop this
                // lane unless a newer one already replaced it.
                if let Err(DispatchError::UnknownTenantEvent(_)) = dispatcher.dispatch(&event).await
                    && let Some(me) = own.upgrade()
                {
                    dispatcher
                        .lanes
                        .remove_if(&tenant, |_, tx| tx.same_channel(&me));
                }
            }
            debug!(tenant = %tenant, "event lane closed");
        });
        tx
    }

    async fn apply_lifecycle(&self, event: &InboundEvent) {
        let transition = match event.kind {
            EventKind::Connected => Transition::Connected {
                phone: event.phone_identity().map(str::to_string),
            },
            EventKind::Disconnected => Transition::Disconnected {
                reason: event
                    .reason()
                    .unwrap_or("provider reported disconnect")
                    .to_string(),
            },
            _ => return,
        };
        let disconnected = matches!(transition, Transition::Disconnected { .. });

        if let Err(e) = self.sessions.apply(&event.tenant, transition).await {
            warn!(tenant = %event.tenant, error = %e, "lifecycle event not applied");
        }
        if disconnected {
            self.engine.invalidate(&event.tenant);
        }
    }
}
