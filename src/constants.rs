// -
// Coordination store namespaces

/// Default tree path under which route entries live
pub(crate) const DEFAULT_ROUTE_ROOT: &str = "/rpc/serviceRoutes";

/// Default coordination-store session timeout, in milliseconds
pub(crate) const DEFAULT_SESSION_TIMEOUT_MS: u64 = 20_000;

/// Prefix for environment-variable configuration overrides
pub(crate) const ENV_PREFIX: &str = "ROUTE_SYNC";
