//! Connection lifecycle manager.
//!
//! Owns the one live session handle against the coordination store. A
//! supervisor task consumes the session's connection events: reaching
//! `SyncConnected` opens the gate for the session's epoch; any loss closes
//! the gate, tears the session down and recreates it from scratch, so the
//! cycle self-perpetuates until connectivity is restored or the manager is
//! shut down. Connect attempts back off exponentially with jitter per the
//! configured [`ReconnectPolicy`].

use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::metrics::SESSION_RECONNECTS;
use crate::ConnectionConfig;
use crate::CoordinationSession;
use crate::ReconnectPolicy;
use crate::Result;
use crate::SessionEvent;
use crate::SessionGate;
use crate::StoreConnector;

pub struct ConnectionManager {
    connector: Arc<dyn StoreConnector>,
    config: ConnectionConfig,
    policy: ReconnectPolicy,
    gate: SessionGate,
    /// The one live handle; replaced only on connect, loss and shutdown
    session: RwLock<Option<Arc<dyn CoordinationSession>>>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        config: ConnectionConfig,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            config,
            policy,
            gate: SessionGate::new(),
            session: RwLock::new(None),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
        })
    }

    /// Spawn the supervisor task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.supervisor.lock();
        if guard.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *guard = Some(tokio::spawn(async move { manager.supervise().await }));
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    /// The live handle, if any. Callers that need to block until
    /// connectivity should use [`ConnectionManager::ensure_connected`].
    pub fn current_session(&self) -> Option<Arc<dyn CoordinationSession>> {
        self.session.read().clone()
    }

    /// Block until a session exists and is marked connected.
    ///
    /// Returns the handle together with its epoch. If the gate reports a
    /// newer epoch than the stored handle (a reconnection is mid-flight),
    /// the caller is held back until the fresh handle is published.
    pub async fn ensure_connected(&self) -> Result<(Arc<dyn CoordinationSession>, u64)> {
        loop {
            let epoch = self.gate.wait_open().await?;
            if let Some(session) = self.current_session() {
                if session.epoch() == epoch {
                    return Ok((session, epoch));
                }
            }
            // handle publication raced the gate; re-check shortly
            tokio::task::yield_now().await;
        }
    }

    /// Terminate the gate first so no waiter is left blocked, then stop the
    /// supervisor and release the session.
    pub async fn shutdown(&self) {
        self.gate.terminate();
        self.cancel.cancel();
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let session = self.session.write().take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    async fn supervise(self: Arc<Self>) {
        let mut attempt: usize = 0;
        let mut had_session = false;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                connected = self.connector.connect(&self.config) => connected,
            };
            match connected {
                Ok((session, events)) => {
                    attempt = 0;
                    let epoch = session.epoch();
                    *self.session.write() = Some(Arc::clone(&session));
                    if had_session {
                        SESSION_RECONNECTS.inc();
                    }
                    had_session = true;
                    info!("[ConnectionManager] session established, epoch {epoch}");

                    if !self.drive_session(&session, events, epoch).await {
                        // shutdown requested
                        session.close().await;
                        return;
                    }

                    warn!("[ConnectionManager] session {epoch} lost; recreating");
                    self.gate.close();
                    *self.session.write() = None;
                    session.close().await;
                }
                Err(e) => {
                    attempt += 1;
                    if self.policy.is_exhausted(attempt) {
                        error!(
                            "[ConnectionManager] giving up after {attempt} connect attempts: {e}"
                        );
                        self.gate.terminate();
                        return;
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "[ConnectionManager] connect attempt {attempt} failed: {e}; retrying in {delay:?}"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Consume one session's event stream. Returns `false` when shutdown was
    /// requested, `true` when the session was lost and must be recreated.
    async fn drive_session(
        &self,
        _session: &Arc<dyn CoordinationSession>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        epoch: u64,
    ) -> bool {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                event = events.recv() => match event {
                    Some(SessionEvent::SyncConnected) => {
                        debug!("[ConnectionManager] session {epoch} connected; opening gate");
                        self.gate.open(epoch);
                    }
                    Some(SessionEvent::Disconnected) | Some(SessionEvent::Expired) => {
                        return true;
                    }
                    // event stream closed under us: treat as session loss
                    None => return true,
                },
            }
        }
    }
}
