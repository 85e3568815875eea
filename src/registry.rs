//! Public surface of the engine: read the live route cache, write routes,
//! clear the namespace.
//!
//! ## Example
//! ```ignore
//! let settings = Settings::load(None)?;
//! let registry = RouteRegistry::builder(settings)
//!     .connector(my_store_connector)
//!     .build()?;
//!
//! registry
//!     .add_routes(vec![ServiceRoute::new(
//!         ServiceDescriptor::new("svc-a"),
//!         vec![Address::new("10.0.0.1", 9000)],
//!     )])
//!     .await?;
//!
//! let routes = registry.get_routes().await?;
//! registry.shutdown().await;
//! ```

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::metrics::register_custom_metrics;
use crate::namespace::ensure_namespace;
use crate::namespace::tear_down_namespace;
use crate::sync::SyncEngine;
use crate::BincodeCodec;
use crate::ConnectionManager;
use crate::CoordinationSession;
use crate::Error;
use crate::Result;
use crate::RouteCodec;
use crate::ServiceRoute;
use crate::Settings;
use crate::StoreConnector;

/// The route registry: a synchronous-feeling window onto the remote route
/// tree, backed by the live cache.
///
/// - [`get_routes`](RouteRegistry::get_routes) triggers one lazy initial
///   sync; afterwards it only reads the cache, which the watches keep live.
/// - [`add_routes`](RouteRegistry::add_routes) is best-effort across the
///   input set: writes are not atomic as a group and a failure for one route
///   does not prevent attempting the rest.
/// - [`clear`](RouteRegistry::clear) removes the root path structure itself,
///   not just the entries under it; the next `add_routes` recreates it.
pub struct RouteRegistry {
    manager: Arc<ConnectionManager>,
    engine: Arc<SyncEngine>,
    codec: Arc<dyn RouteCodec>,
    root: String,
    init: OnceCell<()>,
}

pub struct RouteRegistryBuilder {
    settings: Settings,
    connector: Option<Arc<dyn StoreConnector>>,
    codec: Arc<dyn RouteCodec>,
}

impl RouteRegistry {
    pub fn builder(settings: Settings) -> RouteRegistryBuilder {
        RouteRegistryBuilder {
            settings,
            connector: None,
            codec: Arc::new(BincodeCodec),
        }
    }

    /// Current route set, one entry per service id.
    ///
    /// The first call performs the initial sync (blocking on the session
    /// gate); subsequent calls never re-sync from scratch, they read the
    /// cache kept current by the watch loops.
    pub async fn get_routes(&self) -> Result<Vec<ServiceRoute>> {
        if self.manager.gate().current().terminated {
            return Err(Error::Terminated);
        }
        self.init
            .get_or_try_init(|| async { self.engine.start().await })
            .await?;
        Ok(self.engine.routes())
    }

    /// Write every route in `routes`, creating or unconditionally
    /// overwriting one node per id under the route root.
    ///
    /// # Errors
    /// - [`Error::PartialWrite`] when some writes failed; every route was
    ///   still attempted, and earlier successes stay committed
    /// - [`Error::Terminated`] after shutdown
    pub async fn add_routes(&self, routes: Vec<ServiceRoute>) -> Result<()> {
        let (session, _epoch) = self.manager.ensure_connected().await?;
        let created = ensure_namespace(session.as_ref(), &self.root).await?;

        let mut failures = Vec::new();
        for route in &routes {
            if let Err(e) = self.write_route(session.as_ref(), route).await {
                error!("[RouteRegistry] write of route {} failed: {e}", route.id());
                failures.push((route.id().to_string(), e));
            }
        }

        if created {
            // the namespace was just reborn (first use, after Clear, or
            // behind an in-flight first sync that observed it as absent);
            // the engine needs a fresh top-level check to arm a children
            // watch, and resync serializes with any sync still running
            if let Err(e) = self.engine.resync().await {
                warn!("[RouteRegistry] resync after namespace creation failed: {e}");
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::PartialWrite { failures })
        }
    }

    /// Delete the entire namespace under (and including) the route root,
    /// walking level by level toward the store root.
    pub async fn clear(&self) -> Result<()> {
        let (session, _epoch) = self.manager.ensure_connected().await?;
        tear_down_namespace(session.as_ref(), &self.root).await?;
        self.engine.clear_local().await;
        info!("[RouteRegistry] namespace {} cleared", self.root);
        Ok(())
    }

    /// Tear the registry down: the gate is terminated first so every blocked
    /// waiter is released with [`Error::Terminated`], then the watch loops
    /// are stopped and the session is closed.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        self.engine.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn connection_state(&self) -> crate::GateState {
        self.manager.gate().current()
    }

    async fn write_route(
        &self,
        session: &dyn CoordinationSession,
        route: &ServiceRoute,
    ) -> Result<()> {
        let path = format!("{}/{}", self.root, route.id());
        let bytes = self.codec.encode(route)?;
        if session.exists(&path).await? {
            session.set_data(&path, bytes).await?;
        } else {
            match session.create(&path, bytes.clone()).await {
                Ok(()) => {}
                // lost the creation race; overwrite unconditionally
                Err(e) if e.is_node_exists() => session.set_data(&path, bytes).await?,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl RouteRegistryBuilder {
    /// Session factory for the coordination store. Required.
    pub fn connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Payload codec override; defaults to [`BincodeCodec`].
    pub fn codec(mut self, codec: Arc<dyn RouteCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn build(self) -> Result<RouteRegistry> {
        let connector = self
            .connector
            .ok_or_else(|| Error::Fatal("no store connector configured".to_string()))?;
        register_custom_metrics();

        let root = self.settings.effective_root();
        let manager = ConnectionManager::new(
            connector,
            self.settings.connection.clone(),
            self.settings.reconnect,
        );
        manager.start();
        let engine = SyncEngine::new(Arc::clone(&manager), Arc::clone(&self.codec), root.clone());

        Ok(RouteRegistry {
            manager,
            engine,
            root,
            init: OnceCell::new(),
            codec: self.codec,
        })
    }
}
