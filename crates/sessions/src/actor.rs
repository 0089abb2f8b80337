//! Per-session actor.
//!
//! The actor is the only writer of its session's [`SessionStatus`]. Commands
//! are processed strictly in arrival order; snapshots are published on a
//! watch channel after every change.

use std::{sync::Arc, time::Duration};

use {
    tokio::{
        sync::{mpsc, oneshot, watch},
        task::AbortHandle,
    },
    tokio_util::sync::{CancellationToken, WaitForCancellationFuture},
    tracing::{debug, info, warn},
    zapgate_channels::{ChatProvider, PairingOutcome},
    zapgate_common::{ConnectionState, InstanceKey},
};

use crate::{
    error::SessionError,
    registry::ConnectOutcome,
    state::{SessionStatus, Transition},
};

pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<ConnectOutcome, SessionError>>,
    },
    Apply {
        transition: Transition,
        reply: Option<oneshot::Sender<Result<bool, SessionError>>>,
    },
    Shutdown,
}

/// What readers see: the status plus the cancellation token of the current
/// connected epoch.
#[derive(Clone)]
pub(crate) struct Snapshot {
    status: SessionStatus,
    cancel: CancellationToken,
}

/// Proof that the session was connected at a particular epoch.
///
/// The token is cancelled as soon as the session leaves that epoch, so
/// long-running work can `select!` on [`ConnectedLease::cancelled`].
#[derive(Debug, Clone)]
pub struct ConnectedLease {
    epoch: u64,
    cancel: CancellationToken,
}

impl ConnectedLease {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// Cheap, cloneable reference to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    key: InstanceKey,
    seq: u64,
    tx: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl SessionHandle {
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Creation order within the registry.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot.borrow().status.clone()
    }

    /// Take a lease on the current connected epoch.
    pub fn lease(&self) -> Result<ConnectedLease, SessionError> {
        let snapshot = self.snapshot.borrow();
        if !snapshot.status.is_connected() {
            return Err(SessionError::SessionNotConnected(self.key.clone()));
        }
        Ok(ConnectedLease {
            epoch: snapshot.status.epoch,
            cancel: snapshot.cancel.clone(),
        })
    }

    /// Whether the session is still connected under `epoch`.
    pub fn is_current(&self, epoch: u64) -> bool {
        let snapshot = self.snapshot.borrow();
        snapshot.status.is_connected() && snapshot.status.epoch == epoch
    }

    /// Wait until a pairing artifact is available or pairing ends.
    pub async fn wait_for_artifact(&self, wait: Duration) -> Result<String, SessionError> {
        let mut rx = self.snapshot.clone();
        let ready = rx.wait_for(|s| {
            s.status.pairing_artifact.is_some() || !s.status.state.is_pairing()
        });
        match tokio::time::timeout(wait, ready).await {
            Err(_) => Err(SessionError::PairingTimeout(self.key.clone())),
            Ok(Err(_)) => Err(SessionError::UnknownInstance(self.key.clone())),
            Ok(Ok(snapshot)) => snapshot
                .status
                .pairing_artifact
                .clone()
                .ok_or_else(|| SessionError::NoPairingInProgress(self.key.clone())),
        }
    }

    pub(crate) async fn connect(&self) -> Result<ConnectOutcome, SessionError> {
        self.request(|reply| Command::Connect { reply }).await
    }

    pub(crate) async fn apply(&self, transition: Transition) -> Result<bool, SessionError> {
        self.request(|reply| Command::Apply {
            transition,
            reply: Some(reply),
        })
        .await
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| SessionError::UnknownInstance(self.key.clone()))?;
        rx.await
            .map_err(|_| SessionError::UnknownInstance(self.key.clone()))?
    }
}

struct SessionActor {
    key: InstanceKey,
    rx: mpsc::UnboundedReceiver<Command>,
    // Weak so that dropping every handle ends the actor.
    tx: mpsc::WeakUnboundedSender<Command>,
    snapshot: watch::Sender<Snapshot>,
    provider: Arc<dyn ChatProvider>,
    pairing_timeout: Duration,
    pairing: Option<AbortHandle>,
}

/// Start the actor for a new session.
pub(crate) fn spawn(
    key: InstanceKey,
    seq: u64,
    provider: Arc<dyn ChatProvider>,
    pairing_timeout: Duration,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
        status: SessionStatus::new(key.clone()),
        cancel: CancellationToken::new(),
    });

    let actor = SessionActor {
        key: key.clone(),
        rx,
        tx: tx.downgrade(),
        snapshot: snapshot_tx,
        provider,
        pairing_timeout,
        pairing: None,
    };
    tokio::spawn(actor.run());

    SessionHandle {
        key,
        seq,
        tx,
        snapshot: snapshot_rx,
    }
}

impl SessionActor {
    async fn run(mut self) {
        debug!(instance = %self.key, "session actor started");
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Connect { reply } => {
                    let _ = reply.send(self.connect());
                },
                Command::Apply { transition, reply } => {
                    let result = self.apply(transition);
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                },
                Command::Shutdown => break,
            }
        }
        self.stop();
        debug!(instance = %self.key, "session actor stopped");
    }

    fn connect(&mut self) -> Result<ConnectOutcome, SessionError> {
        if !self.apply(Transition::ConnectRequested)? {
            return Ok(ConnectOutcome::AlreadyPairing);
        }
        self.start_pairing();
        Ok(ConnectOutcome::PairingStarted)
    }

    fn apply(&mut self, transition: Transition) -> Result<bool, SessionError> {
        let from = self.snapshot.borrow().status.state;
        let mut result = Ok(false);
        self.snapshot.send_if_modified(|snapshot| {
            result = snapshot.status.apply(&transition);
            if from == ConnectionState::Connected && !snapshot.status.is_connected() {
                snapshot.cancel.cancel();
                snapshot.cancel = CancellationToken::new();
            }
            matches!(result, Ok(true))
        });

        let to = self.snapshot.borrow().status.state;
        match &result {
            Ok(true) => info!(instance = %self.key, %from, %to, "session transition"),
            Ok(false) => debug!(instance = %self.key, state = %to, ?transition, "transition had no effect"),
            Err(e) => debug!(instance = %self.key, error = %e, "transition rejected"),
        }
        if !to.is_pairing()
            && let Some(pairing) = self.pairing.take()
        {
            pairing.abort();
        }
        result
    }

    fn start_pairing(&mut self) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let provider = Arc::clone(&self.provider);
        let key = self.key.clone();
        let timeout = self.pairing_timeout;

        let task = tokio::spawn(async move {
            let transition = match tokio::time::timeout(timeout, provider.pair(&key)).await {
                Ok(Ok(PairingOutcome::Qr(qr))) => Transition::PairingIssued(qr),
                Ok(Ok(PairingOutcome::AlreadyPaired { phone })) => Transition::Connected {
                    phone: Some(phone).filter(|p| !p.is_empty()),
                },
                Ok(Err(e)) => {
                    warn!(instance = %key, error = %e, "pairing failed");
                    Transition::PairingFailed(e.to_string())
                },
                Err(_) => {
                    warn!(instance = %key, ?timeout, "pairing timed out");
                    Transition::PairingFailed("pairing timed out".into())
                },
            };
            let _ = tx.send(Command::Apply {
                transition,
                reply: None,
            });
        });
        self.pairing = Some(task.abort_handle());
    }

    fn stop(&mut self) {
        if let Some(pairing) = self.pairing.take() {
            pairing.abort();
        }
        self.snapshot.send_modify(|snapshot| {
            let _ = snapshot.status.apply(&Transition::Disconnected {
                reason: "deleted".into(),
            });
            snapshot.cancel.cancel();
        });
    }
}
