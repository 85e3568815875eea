//! Synchronization engine: keeps the route cache current via children and
//! node watches, re-arming every one-shot watch as part of handling the
//! event that fired it.
//!
//! ## Mutation discipline
//! Every cache mutation runs under one `tokio::sync::Mutex`, held across
//! the store round trips that belong to the same sync step. Readers load
//! whole-map snapshots from [`RouteCache`] and never see a partial step.
//!
//! ## Watch lifecycle
//! Watch loops are plain tasks with an explicit "handle event, then
//! re-subscribe" cycle instead of recursively constructed callbacks. Each
//! loop owns a slot (children: a generation, nodes: an id in a `DashMap`);
//! a superseded loop notices it lost its slot and exits, so at most one
//! live subscription observes each path.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::metrics::CACHE_FULL_REFRESHES;
use crate::metrics::ROUTE_DECODE_FAILURES;
use crate::metrics::WATCH_REARMED;
use crate::sync::RouteCache;
use crate::ConnectionManager;
use crate::ConnectionState;
use crate::CoordinationSession;
use crate::NodeEventKind;
use crate::Result;
use crate::RouteCodec;
use crate::ServiceRoute;
use crate::WatchReceiver;

struct NodeWatchSlot {
    watch_id: u64,
    cancel: CancellationToken,
}

pub(crate) struct SyncEngine {
    manager: Arc<ConnectionManager>,
    cache: RouteCache,
    codec: Arc<dyn RouteCodec>,
    /// Effective route root path (chroot already applied)
    root: String,
    /// The single mutation path; see module docs
    mutation: Mutex<()>,
    /// Live node-watch loops, keyed by entry path
    node_watches: DashMap<String, NodeWatchSlot>,
    /// Generation + cancel token of the live children-watch loop
    children_watch: parking_lot::Mutex<Option<(u64, CancellationToken)>>,
    next_watch_id: AtomicU64,
    /// Epoch of the session the cache was last fully rebuilt against
    last_synced_epoch: AtomicU64,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub(crate) fn new(
        manager: Arc<ConnectionManager>,
        codec: Arc<dyn RouteCodec>,
        root: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            cache: RouteCache::new(),
            codec,
            root,
            mutation: Mutex::new(()),
            node_watches: DashMap::new(),
            children_watch: parking_lot::Mutex::new(None),
            next_watch_id: AtomicU64::new(0),
            last_synced_epoch: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn routes(&self) -> Vec<ServiceRoute> {
        self.cache.routes()
    }

    pub(crate) fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// One-time startup: full sync, then keep resyncing whenever the gate
    /// reopens for a fresh session.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<()> {
        self.resync().await?;
        self.spawn_gate_monitor();
        Ok(())
    }

    /// Full refresh under the mutation lock: rebuild the mapping from the
    /// remote tree and install fresh watches. No duplicates can result; the
    /// replacement map is keyed by id.
    pub(crate) async fn resync(self: &Arc<Self>) -> Result<()> {
        let _guard = self.mutation.lock().await;
        let (session, epoch) = self.manager.ensure_connected().await?;
        let map = self.load_full(&session, epoch).await?;
        self.cache.publish(map);
        self.last_synced_epoch.store(epoch, Ordering::SeqCst);
        CACHE_FULL_REFRESHES.inc();
        debug!(
            "[SyncEngine] full refresh against epoch {epoch}: {} route(s)",
            self.cache.len()
        );
        Ok(())
    }

    /// Drop every entry and subscription. Used by Clear after the remote
    /// namespace is torn down; the remote deletions also arrive as
    /// notifications, and both paths are idempotent.
    pub(crate) async fn clear_local(&self) {
        let _guard = self.mutation.lock().await;
        self.cancel_children_watch();
        self.cancel_node_watches();
        self.cache.publish(HashMap::new());
    }

    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        self.cancel_children_watch();
        self.cancel_node_watches();
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    // ---------------------------------------------------------------
    // Full sync

    async fn load_full(
        self: &Arc<Self>,
        session: &Arc<dyn CoordinationSession>,
        epoch: u64,
    ) -> Result<HashMap<String, ServiceRoute>> {
        self.cancel_node_watches();
        let (children, receiver) = match session.get_children_w(&self.root).await {
            Ok(v) => v,
            Err(e) if e.is_no_node() => {
                // root absent: the cache degrades to empty and no watch is
                // installed until a fresh top-level check (a later resync)
                debug!("[SyncEngine] route root {} absent; cache is empty", self.root);
                return Ok(HashMap::new());
            }
            Err(e) => return Err(e.into()),
        };
        self.spawn_children_loop(receiver, epoch);

        let previous = self.cache.snapshot();
        let mut map = HashMap::with_capacity(children.len());
        for id in children {
            match self.fetch_entry(session, epoch, &id).await? {
                Some(route) => {
                    map.insert(id, route);
                }
                None => {
                    // undecodable or vanished mid-walk; a surviving previous
                    // value is kept rather than dropped
                    if let Some(prev) = previous.get(&id).cloned() {
                        map.insert(id, prev);
                    }
                }
            }
        }
        Ok(map)
    }

    /// Fetch one entry's payload, arm its node watch, and decode. A decode
    /// failure is reported and skipped, never propagated; store errors other
    /// than `NoNode` are the caller's problem.
    async fn fetch_entry(
        self: &Arc<Self>,
        session: &Arc<dyn CoordinationSession>,
        epoch: u64,
        id: &str,
    ) -> Result<Option<ServiceRoute>> {
        let path = self.entry_path(id);
        let (bytes, receiver) = match session.get_data_w(&path).await {
            Ok(v) => v,
            Err(e) if e.is_no_node() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.spawn_node_loop(path.clone(), id.to_string(), receiver, epoch);
        match self.codec.decode(&bytes) {
            Ok(route) => Ok(Some(route)),
            Err(e) => {
                warn!("[SyncEngine] undecodable payload at {path}: {e}");
                ROUTE_DECODE_FAILURES.with_label_values(&[id]).inc();
                Ok(None)
            }
        }
    }

    // ---------------------------------------------------------------
    // Children watch

    fn spawn_children_loop(self: &Arc<Self>, receiver: WatchReceiver, epoch: u64) {
        let gen = self.next_watch_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.cancel.child_token();
        {
            let mut guard = self.children_watch.lock();
            if let Some((_, prev)) = guard.replace((gen, cancel.clone())) {
                prev.cancel();
            }
        }
        let engine = Arc::clone(self);
        let handle =
            tokio::spawn(async move { engine.children_loop(receiver, epoch, gen, cancel).await });
        self.track_task(handle);
    }

    async fn children_loop(
        self: Arc<Self>,
        mut watch: WatchReceiver,
        epoch: u64,
        gen: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = &mut watch => match event {
                    Ok(event) => event,
                    // session torn down; the post-reconnect resync re-arms
                    Err(_) => break,
                },
            };
            if !self.owns_children_watch(gen) {
                break;
            }
            if event.epoch != epoch {
                debug!("[SyncEngine] ignoring stale children event: {event:?}");
                break;
            }
            if event.path != self.root {
                // misdirected delivery: the step below re-lists anyway, so
                // whatever actually changed is applied, not just re-armed
                debug!("[SyncEngine] misdirected children event: {event:?}");
            }
            match self.apply_children_step(epoch, gen).await {
                Ok(Some(receiver)) => watch = receiver,
                Ok(None) => break,
                Err(e) => {
                    warn!("[SyncEngine] children step failed: {e}");
                    break;
                }
            }
        }
        let mut guard = self.children_watch.lock();
        if guard.as_ref().map(|(g, _)| *g) == Some(gen) {
            *guard = None;
        }
    }

    /// One children-changed step: re-arm the children watch and list the
    /// current child set in a single call, then merge by set difference and
    /// publish one replacement map.
    async fn apply_children_step(
        self: &Arc<Self>,
        epoch: u64,
        gen: u64,
    ) -> Result<Option<WatchReceiver>> {
        let _guard = self.mutation.lock().await;
        if !self.owns_children_watch(gen) {
            return Ok(None);
        }
        let Some(session) = self.session_at(epoch) else {
            return Ok(None);
        };
        let (children, receiver) = match session.get_children_w(&self.root).await {
            Ok(v) => v,
            Err(e) if e.is_no_node() => {
                // root deleted: observed set degrades to empty; no further
                // watch until the path reappears through a fresh check
                self.cancel_node_watches();
                self.cache.publish(HashMap::new());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        WATCH_REARMED.with_label_values(&["children"]).inc();

        let new_ids: HashSet<&str> = children.iter().map(String::as_str).collect();
        let old = self.cache.snapshot();
        let mut map = HashMap::with_capacity(children.len());

        // Old − New: drop entries and their subscriptions
        for (id, route) in old.iter() {
            if new_ids.contains(id.as_str()) {
                map.insert(id.clone(), route.clone());
            } else {
                self.drop_node_watch(&self.entry_path(id));
            }
        }
        // New − Old: fetch, watch and decode each addition; one bad entry
        // never poisons the rest of the step
        for id in &children {
            if old.contains_key(id) {
                continue;
            }
            match self.fetch_entry(&session, epoch, id).await {
                Ok(Some(route)) => {
                    map.insert(id.clone(), route);
                }
                Ok(None) => {}
                Err(e) => warn!("[SyncEngine] fetch of new entry {id} failed: {e}"),
            }
        }
        self.cache.publish(map);
        Ok(Some(receiver))
    }

    // ---------------------------------------------------------------
    // Node watches

    fn spawn_node_loop(
        self: &Arc<Self>,
        path: String,
        id: String,
        receiver: WatchReceiver,
        epoch: u64,
    ) {
        let watch_id = self.next_watch_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.cancel.child_token();
        if let Some(prev) = self.node_watches.insert(
            path.clone(),
            NodeWatchSlot {
                watch_id,
                cancel: cancel.clone(),
            },
        ) {
            prev.cancel.cancel();
        }
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.node_loop(path, id, receiver, epoch, watch_id, cancel).await
        });
        self.track_task(handle);
    }

    async fn node_loop(
        self: Arc<Self>,
        path: String,
        id: String,
        mut watch: WatchReceiver,
        epoch: u64,
        watch_id: u64,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = &mut watch => match event {
                    Ok(event) => event,
                    // session torn down; the post-reconnect resync
                    // re-discovers the entry
                    Err(_) => break,
                },
            };
            if !self.owns_node_watch(&path, watch_id) {
                break;
            }
            if event.epoch != epoch {
                debug!("[SyncEngine] ignoring stale event for {path}: {event:?}");
                break;
            }
            if event.kind == NodeEventKind::Deleted && event.path == path {
                // entry gone; a future children-changed fire re-discovers
                // it if recreated, installing a fresh node watch
                self.apply_node_removal(&id, &path, watch_id).await;
                break;
            }
            // everything else, misdirected deliveries included, resolves
            // against the current remote state: the update path re-reads
            // and re-arms in one call, and removes the entry on NoNode
            match self.apply_node_update(&path, &id, epoch, watch_id).await {
                Ok(Some(receiver)) => watch = receiver,
                Ok(None) => break,
                Err(e) => {
                    warn!("[SyncEngine] update of {path} failed: {e}");
                    break;
                }
            }
        }
        self.node_watches
            .remove_if(&path, |_, slot| slot.watch_id == watch_id);
    }

    /// Data-changed handling: re-arm the node watch and fetch the new bytes
    /// in one call, decode, and replace the cache entry for that id.
    /// Last fetch wins; no version check against the previous value.
    async fn apply_node_update(
        &self,
        path: &str,
        id: &str,
        epoch: u64,
        watch_id: u64,
    ) -> Result<Option<WatchReceiver>> {
        let _guard = self.mutation.lock().await;
        if !self.owns_node_watch(path, watch_id) {
            return Ok(None);
        }
        let Some(session) = self.session_at(epoch) else {
            return Ok(None);
        };
        let (bytes, receiver) = match session.get_data_w(path).await {
            Ok(v) => v,
            Err(e) if e.is_no_node() => {
                // deleted between the event and the fetch
                self.remove_entry(id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        WATCH_REARMED.with_label_values(&["node"]).inc();
        match self.codec.decode(&bytes) {
            Ok(route) => {
                let mut map = (*self.cache.snapshot()).clone();
                map.insert(id.to_string(), route);
                self.cache.publish(map);
            }
            Err(e) => {
                // previous value, if any, stays in the cache
                warn!("[SyncEngine] undecodable payload at {path}: {e}");
                ROUTE_DECODE_FAILURES.with_label_values(&[id]).inc();
            }
        }
        Ok(Some(receiver))
    }

    async fn apply_node_removal(&self, id: &str, path: &str, watch_id: u64) {
        let _guard = self.mutation.lock().await;
        if !self.owns_node_watch(path, watch_id) {
            return;
        }
        self.remove_entry(id);
    }

    // ---------------------------------------------------------------
    // Reconnect resync

    fn spawn_gate_monitor(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let cancel = self.cancel.child_token();
        let mut rx = self.manager.gate().subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let state = *rx.borrow_and_update();
                if state.terminated {
                    return;
                }
                if state.state == ConnectionState::Connected
                    && state.epoch > engine.last_synced_epoch.load(Ordering::SeqCst)
                {
                    if let Err(e) = engine.resync().await {
                        warn!("[SyncEngine] resync after reconnect failed: {e}; retrying");
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = sleep(Duration::from_millis(200)) => {}
                        }
                    }
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        self.track_task(handle);
    }

    // ---------------------------------------------------------------
    // Plumbing

    fn entry_path(&self, id: &str) -> String {
        format!("{}/{}", self.root, id)
    }

    /// Caller must hold the mutation lock.
    fn remove_entry(&self, id: &str) {
        let mut map = (*self.cache.snapshot()).clone();
        if map.remove(id).is_some() {
            self.cache.publish(map);
        }
    }

    fn session_at(&self, epoch: u64) -> Option<Arc<dyn CoordinationSession>> {
        self.manager
            .current_session()
            .filter(|session| session.epoch() == epoch)
    }

    fn owns_node_watch(&self, path: &str, watch_id: u64) -> bool {
        self.node_watches
            .get(path)
            .map(|slot| slot.watch_id == watch_id)
            .unwrap_or(false)
    }

    fn owns_children_watch(&self, gen: u64) -> bool {
        self.children_watch.lock().as_ref().map(|(g, _)| *g) == Some(gen)
    }

    fn drop_node_watch(&self, path: &str) {
        if let Some((_, slot)) = self.node_watches.remove(path) {
            slot.cancel.cancel();
        }
    }

    fn cancel_node_watches(&self) {
        self.node_watches.retain(|_, slot| {
            slot.cancel.cancel();
            false
        });
    }

    fn cancel_children_watch(&self) {
        if let Some((_, token)) = self.children_watch.lock().take() {
            token.cancel();
        }
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}
