//! Coordination-store contract consumed by the synchronization engine.
//!
//! Only operation semantics are specified here; the wire protocol and the
//! session implementation live behind [`StoreConnector`]. The store delivers
//! exactly one notification per armed watch and then drops it, so continued
//! observation requires re-arming (see the sync loops).

mod events;
pub use events::*;

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::ConnectionConfig;
use crate::StoreError;

/// One-shot watch delivery channel. The sender side is dropped when the
/// owning session dies, which surfaces as a receive error to the watch loop.
pub type WatchReceiver = oneshot::Receiver<NodeEvent>;

/// One live session against the coordination store.
///
/// Watch-arming reads (`get_data_w`, `get_children_w`) return the observed
/// state together with the armed watch in a single call, so a caller that
/// re-arms by re-issuing the read cannot miss a change between "watch fired"
/// and "watch re-registered".
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationSession: Send + Sync + 'static {
    /// Session generation. Stamped into every [`NodeEvent`] delivered by
    /// watches this session armed; monotonically increasing across
    /// reconnects of the same connector.
    fn epoch(&self) -> u64;

    async fn exists(&self, path: &str) -> std::result::Result<bool, StoreError>;

    /// Create a persistent, world-accessible node.
    /// Fails with [`StoreError::NodeExists`] if the node is present.
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> std::result::Result<(), StoreError>;

    /// Overwrite node content unconditionally (any-version semantics).
    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> std::result::Result<(), StoreError>;

    async fn get_data(&self, path: &str) -> std::result::Result<Vec<u8>, StoreError>;

    /// Read node content and arm a one-shot watch that fires on
    /// data-changed or node-deleted.
    async fn get_data_w(
        &self,
        path: &str,
    ) -> std::result::Result<(Vec<u8>, WatchReceiver), StoreError>;

    async fn get_children(
        &self,
        path: &str,
    ) -> std::result::Result<Vec<String>, StoreError>;

    /// List child node names and arm a one-shot watch that fires on
    /// child-added, child-removed, or deletion of `path` itself.
    async fn get_children_w(
        &self,
        path: &str,
    ) -> std::result::Result<(Vec<String>, WatchReceiver), StoreError>;

    /// Remove a node unconditionally (any-version semantics).
    async fn delete(&self, path: &str) -> std::result::Result<(), StoreError>;

    /// Invalidate the session. In-flight remote calls fail rather than hang.
    async fn close(&self);
}

/// Session factory. Owned by the connection lifecycle manager, which holds
/// the only live handle and recreates it on loss.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    /// Open a session against `config.connect_string`, honoring the
    /// configured session timeout. Returns the handle plus the stream of
    /// connection-state events for that session.
    #[allow(clippy::type_complexity)]
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> std::result::Result<
        (
            Arc<dyn CoordinationSession>,
            mpsc::UnboundedReceiver<SessionEvent>,
        ),
        StoreError,
    >;
}
