use std::sync::Arc;

use tokio::sync::watch;

use crate::Error;
use crate::Result;

/// Connectivity as observed through the session gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Snapshot of the gate signal: connectivity plus the session generation
/// that produced it.
///
/// The epoch lets a waiter that blocked before a reconnection tell that it
/// was waiting on a now-superseded session and re-fetch the handle instead
/// of operating against a stale one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateState {
    pub state: ConnectionState,
    /// Epoch of the session the gate last opened for (0 before any session)
    pub epoch: u64,
    /// Set once at teardown; the gate never reopens afterwards
    pub terminated: bool,
}

/// Binary connectivity signal with generation awareness.
///
/// Callers and background workers wait on the gate before issuing remote
/// operations; the connection lifecycle manager opens and closes it as the
/// session comes and goes.
#[derive(Clone)]
pub struct SessionGate {
    tx: Arc<watch::Sender<GateState>>,
}

impl SessionGate {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState {
            state: ConnectionState::Connecting,
            epoch: 0,
            terminated: false,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Block until the gate is open, returning the epoch of the connected
    /// session.
    ///
    /// # Errors
    /// - [`Error::Terminated`] once the engine has been torn down; waiters
    ///   blocked at teardown time are released with this error rather than
    ///   left hanging.
    pub async fn wait_open(&self) -> Result<u64> {
        let mut rx = self.tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current.terminated {
                return Err(Error::Terminated);
            }
            if current.state == ConnectionState::Connected {
                return Ok(current.epoch);
            }
            if rx.changed().await.is_err() {
                return Err(Error::Terminated);
            }
        }
    }

    pub fn current(&self) -> GateState {
        *self.tx.borrow()
    }

    /// Receiver for components that track gate transitions themselves.
    pub(crate) fn subscribe(&self) -> watch::Receiver<GateState> {
        self.tx.subscribe()
    }

    pub(crate) fn open(&self, epoch: u64) {
        self.tx.send_modify(|s| {
            if !s.terminated {
                s.state = ConnectionState::Connected;
                s.epoch = epoch;
            }
        });
    }

    pub(crate) fn close(&self) {
        self.tx.send_modify(|s| {
            if !s.terminated {
                s.state = ConnectionState::Disconnected;
            }
        });
    }

    /// Terminal transition; releases every waiter with [`Error::Terminated`].
    pub(crate) fn terminate(&self) {
        self.tx.send_modify(|s| {
            s.terminated = true;
            s.state = ConnectionState::Disconnected;
        });
    }
}
