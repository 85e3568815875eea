//! Configuration for the route synchronization engine.
//!
//! Settings are loaded from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Optional config file
//! 3. Environment variables with the `ROUTE_SYNC` prefix (highest priority)

mod reconnect;
pub use reconnect::*;


use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use std::time::Duration;

use crate::constants::DEFAULT_ROUTE_ROOT;
use crate::constants::DEFAULT_SESSION_TIMEOUT_MS;
use crate::constants::ENV_PREFIX;
use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Coordination-store connection parameters
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Route tree layout
    #[serde(default)]
    pub routes: RouteConfig,

    /// Session re-establishment policy
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// Host list handed to the store client, e.g. `"zk1:2181,zk2:2181"`
    #[serde(default)]
    pub connect_string: String,

    /// Coordination-store session timeout (unit: milliseconds)
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Optional store-side path prefix applied to every path the engine
    /// touches. Empty or `/` means no prefix.
    #[serde(default)]
    pub chroot: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouteConfig {
    /// Tree path under which one node per service route is kept
    #[serde(default = "default_root_path")]
    pub root_path: String,
}

impl Settings {
    /// Load configuration with proper priority ordering.
    ///
    /// # Arguments
    /// * `file` - Optional path to a TOML settings file
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        if let Some(path) = file {
            config = config.add_source(File::with_name(path).required(true));
        }

        // Environment variables (highest priority)
        config = config.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        Ok(config.build()?.try_deserialize()?)
    }

    /// The route root path with the configured chroot prefix applied.
    ///
    /// Every component of the engine addresses the tree through this path
    /// only, so the chroot is honored uniformly instead of being carried as
    /// dead configuration.
    pub fn effective_root(&self) -> String {
        let root = normalize_path(&self.routes.root_path);
        match self.connection.chroot.as_deref() {
            Some(chroot) if !chroot.trim_matches('/').is_empty() => {
                format!("{}{}", normalize_path(chroot), root)
            }
            _ => root,
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.session_timeout_ms)
    }
}

/// Collapse a path to the canonical `/seg1/seg2` form.
fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(seg);
    }
    out
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_string: String::new(),
            session_timeout_ms: default_session_timeout_ms(),
            chroot: None,
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
        }
    }
}

fn default_session_timeout_ms() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MS
}
fn default_root_path() -> String {
    DEFAULT_ROUTE_ROOT.to_string()
}
