use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::ServiceRoute;

/// In-memory route mapping, keyed by service id.
///
/// Readers load complete snapshots; writers publish complete replacement
/// maps. A reader may observe any consistent historical snapshot but never
/// a half-applied sync step. All writers go through the engine's single
/// mutation path.
pub(crate) struct RouteCache {
    entries: ArcSwap<HashMap<String, ServiceRoute>>,
}

impl RouteCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<HashMap<String, ServiceRoute>> {
        self.entries.load_full()
    }

    /// Atomically replace the whole mapping.
    pub(crate) fn publish(&self, map: HashMap<String, ServiceRoute>) {
        self.entries.store(Arc::new(map));
    }

    pub(crate) fn routes(&self) -> Vec<ServiceRoute> {
        self.snapshot().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }
}
