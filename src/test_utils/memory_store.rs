//! In-memory coordination store with genuine one-shot watch semantics.
//!
//! Backs the engine tests without a live server: nodes live in a shared
//! tree, watches fire exactly once and must be re-armed, sessions carry
//! epochs, and `kill_session` simulates a connection loss that invalidates
//! the current session while the tree survives for the successor.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::ConnectionConfig;
use crate::CoordinationSession;
use crate::NodeEvent;
use crate::NodeEventKind;
use crate::SessionEvent;
use crate::StoreConnector;
use crate::StoreError;
use crate::WatchReceiver;

struct ArmedWatch {
    epoch: u64,
    tx: oneshot::Sender<NodeEvent>,
}

#[derive(Default)]
struct TreeState {
    /// path -> payload; BTreeMap so children can be listed by prefix scan
    nodes: BTreeMap<String, Vec<u8>>,
    data_watches: HashMap<String, Vec<ArmedWatch>>,
    child_watches: HashMap<String, Vec<ArmedWatch>>,
}

struct SessionSlot {
    epoch: u64,
    alive: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

struct StoreInner {
    tree: Mutex<TreeState>,
    sessions: Mutex<Vec<SessionSlot>>,
    next_epoch: AtomicU64,
    /// Gate on new connects; lets tests hold a disconnect window open
    connects_allowed: tokio::sync::watch::Sender<bool>,
}

#[derive(Clone)]
pub(crate) struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        let (connects_allowed, _) = tokio::sync::watch::channel(true);
        Self {
            inner: Arc::new(StoreInner {
                tree: Mutex::new(TreeState::default()),
                sessions: Mutex::new(Vec::new()),
                next_epoch: AtomicU64::new(0),
                connects_allowed,
            }),
        }
    }

    /// Make subsequent `connect` calls park until [`MemoryStore::allow_connects`].
    /// `send_replace` so the value changes even while no connect is waiting.
    pub(crate) fn block_connects(&self) {
        let _ = self.inner.connects_allowed.send_replace(false);
    }

    pub(crate) fn allow_connects(&self) {
        let _ = self.inner.connects_allowed.send_replace(true);
    }

    pub(crate) fn connector(&self) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector {
            store: self.clone(),
        })
    }

    // -----------------------------------------------------------
    // Server-side mutations, as another client would perform them

    pub(crate) fn create_node(&self, path: &str, data: Vec<u8>) {
        let mut tree = self.inner.tree.lock();
        assert!(
            !tree.nodes.contains_key(path),
            "test tree already has {path}"
        );
        tree.nodes.insert(path.to_string(), data);
        if let Some(parent) = parent_path(path) {
            fire(&mut tree.child_watches, &parent, NodeEventKind::ChildrenChanged);
        }
    }

    pub(crate) fn set_node(&self, path: &str, data: Vec<u8>) {
        let mut tree = self.inner.tree.lock();
        assert!(tree.nodes.contains_key(path), "test tree is missing {path}");
        tree.nodes.insert(path.to_string(), data);
        fire(&mut tree.data_watches, path, NodeEventKind::DataChanged);
    }

    pub(crate) fn delete_node(&self, path: &str) {
        let mut tree = self.inner.tree.lock();
        assert!(
            tree.nodes.remove(path).is_some(),
            "test tree is missing {path}"
        );
        fire(&mut tree.data_watches, path, NodeEventKind::Deleted);
        fire(&mut tree.child_watches, path, NodeEventKind::Deleted);
        if let Some(parent) = parent_path(path) {
            fire(&mut tree.child_watches, &parent, NodeEventKind::ChildrenChanged);
        }
    }

    /// Overwrite a node without notifying its data watches, as if the
    /// change and its notification were separated by a partition.
    pub(crate) fn set_node_silently(&self, path: &str, data: Vec<u8>) {
        let mut tree = self.inner.tree.lock();
        assert!(tree.nodes.contains_key(path), "test tree is missing {path}");
        tree.nodes.insert(path.to_string(), data);
    }

    /// Deliver the data watches armed at `armed_at`, but label the event
    /// with a different path than the one the subscription covers.
    pub(crate) fn misfire_data_watch(&self, armed_at: &str, reported: &str) {
        let mut tree = self.inner.tree.lock();
        if let Some(armed) = tree.data_watches.remove(armed_at) {
            for watch in armed {
                let _ = watch.tx.send(NodeEvent {
                    kind: NodeEventKind::DataChanged,
                    path: reported.to_string(),
                    epoch: watch.epoch,
                });
            }
        }
    }

    pub(crate) fn has_node(&self, path: &str) -> bool {
        self.inner.tree.lock().nodes.contains_key(path)
    }

    pub(crate) fn node_count(&self) -> usize {
        self.inner.tree.lock().nodes.len()
    }

    /// Simulate losing the current session: its operations start failing
    /// with `ConnectionLoss`, its armed watches are dropped, and the session
    /// event stream reports `Disconnected` then `Expired`. The tree survives
    /// for the next session.
    pub(crate) fn kill_session(&self) {
        let sessions = self.inner.sessions.lock();
        if let Some(slot) = sessions.last() {
            slot.alive.store(false, Ordering::SeqCst);
            let _ = slot.events.send(SessionEvent::Disconnected);
            let _ = slot.events.send(SessionEvent::Expired);
            let dead = slot.epoch;
            drop(sessions);
            let mut tree = self.inner.tree.lock();
            for watches in tree.data_watches.values_mut() {
                watches.retain(|w| w.epoch != dead);
            }
            for watches in tree.child_watches.values_mut() {
                watches.retain(|w| w.epoch != dead);
            }
        }
    }

    pub(crate) fn current_epoch(&self) -> u64 {
        self.inner.next_epoch.load(Ordering::SeqCst)
    }
}

fn parent_path(path: &str) -> Option<String> {
    let idx = path.rfind('/')?;
    if idx == 0 {
        None
    } else {
        Some(path[..idx].to_string())
    }
}

fn fire(watches: &mut HashMap<String, Vec<ArmedWatch>>, path: &str, kind: NodeEventKind) {
    if let Some(armed) = watches.remove(path) {
        for watch in armed {
            let _ = watch.tx.send(NodeEvent {
                kind,
                path: path.to_string(),
                epoch: watch.epoch,
            });
        }
    }
}

fn direct_children(nodes: &BTreeMap<String, Vec<u8>>, path: &str) -> Vec<String> {
    let prefix = format!("{path}/");
    nodes
        .range(prefix.clone()..)
        .take_while(|(p, _)| p.starts_with(&prefix))
        .filter(|(p, _)| !p[prefix.len()..].contains('/'))
        .map(|(p, _)| p[prefix.len()..].to_string())
        .collect()
}

pub(crate) struct MemoryConnector {
    store: MemoryStore,
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        _config: &ConnectionConfig,
    ) -> std::result::Result<
        (
            Arc<dyn CoordinationSession>,
            mpsc::UnboundedReceiver<SessionEvent>,
        ),
        StoreError,
    > {
        let inner = &self.store.inner;
        let mut allowed = inner.connects_allowed.subscribe();
        let _ = allowed.wait_for(|allowed| *allowed).await;
        let epoch = inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::SyncConnected)
            .expect("fresh receiver accepts the connected event");
        inner.sessions.lock().push(SessionSlot {
            epoch,
            alive: Arc::clone(&alive),
            events: tx,
        });
        let session = MemorySession {
            inner: Arc::clone(inner),
            epoch,
            alive,
        };
        Ok((Arc::new(session), rx))
    }
}

pub(crate) struct MemorySession {
    inner: Arc<StoreInner>,
    epoch: u64,
    alive: Arc<AtomicBool>,
}

impl MemorySession {
    fn check_alive(&self) -> std::result::Result<(), StoreError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::ConnectionLoss)
        }
    }

    fn arm(&self, watches: &mut HashMap<String, Vec<ArmedWatch>>, path: &str) -> WatchReceiver {
        let (tx, rx) = oneshot::channel();
        watches.entry(path.to_string()).or_default().push(ArmedWatch {
            epoch: self.epoch,
            tx,
        });
        rx
    }
}

#[async_trait]
impl CoordinationSession for MemorySession {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    async fn exists(&self, path: &str) -> std::result::Result<bool, StoreError> {
        self.check_alive()?;
        Ok(self.inner.tree.lock().nodes.contains_key(path))
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> std::result::Result<(), StoreError> {
        self.check_alive()?;
        let mut tree = self.inner.tree.lock();
        if tree.nodes.contains_key(path) {
            return Err(StoreError::NodeExists {
                path: path.to_string(),
            });
        }
        if let Some(parent) = parent_path(path) {
            if !tree.nodes.contains_key(&parent) {
                return Err(StoreError::NoNode { path: parent });
            }
        }
        tree.nodes.insert(path.to_string(), data);
        if let Some(parent) = parent_path(path) {
            fire(&mut tree.child_watches, &parent, NodeEventKind::ChildrenChanged);
        }
        Ok(())
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> std::result::Result<(), StoreError> {
        self.check_alive()?;
        let mut tree = self.inner.tree.lock();
        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NoNode {
                path: path.to_string(),
            });
        }
        tree.nodes.insert(path.to_string(), data);
        fire(&mut tree.data_watches, path, NodeEventKind::DataChanged);
        Ok(())
    }

    async fn get_data(&self, path: &str) -> std::result::Result<Vec<u8>, StoreError> {
        self.check_alive()?;
        let tree = self.inner.tree.lock();
        tree.nodes
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NoNode {
                path: path.to_string(),
            })
    }

    async fn get_data_w(
        &self,
        path: &str,
    ) -> std::result::Result<(Vec<u8>, WatchReceiver), StoreError> {
        self.check_alive()?;
        let mut tree = self.inner.tree.lock();
        let data = tree
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NoNode {
                path: path.to_string(),
            })?;
        let rx = self.arm(&mut tree.data_watches, path);
        Ok((data, rx))
    }

    async fn get_children(
        &self,
        path: &str,
    ) -> std::result::Result<Vec<String>, StoreError> {
        self.check_alive()?;
        let tree = self.inner.tree.lock();
        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NoNode {
                path: path.to_string(),
            });
        }
        Ok(direct_children(&tree.nodes, path))
    }

    async fn get_children_w(
        &self,
        path: &str,
    ) -> std::result::Result<(Vec<String>, WatchReceiver), StoreError> {
        self.check_alive()?;
        let mut tree = self.inner.tree.lock();
        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NoNode {
                path: path.to_string(),
            });
        }
        let children = direct_children(&tree.nodes, path);
        let rx = self.arm(&mut tree.child_watches, path);
        Ok((children, rx))
    }

    async fn delete(&self, path: &str) -> std::result::Result<(), StoreError> {
        self.check_alive()?;
        let mut tree = self.inner.tree.lock();
        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NoNode {
                path: path.to_string(),
            });
        }
        if !direct_children(&tree.nodes, path).is_empty() {
            return Err(StoreError::Failure(format!("{path} is not empty")));
        }
        tree.nodes.remove(path);
        fire(&mut tree.data_watches, path, NodeEventKind::Deleted);
        fire(&mut tree.child_watches, path, NodeEventKind::Deleted);
        if let Some(parent) = parent_path(path) {
            fire(&mut tree.child_watches, &parent, NodeEventKind::ChildrenChanged);
        }
        Ok(())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let dead = self.epoch;
        let mut tree = self.inner.tree.lock();
        for watches in tree.data_watches.values_mut() {
            watches.retain(|w| w.epoch != dead);
        }
        for watches in tree.child_watches.values_mut() {
            watches.retain(|w| w.epoch != dead);
        }
    }
}
