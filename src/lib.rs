mod config;
mod constants;
mod errors;
mod metrics;
mod namespace;
mod registry;
mod route;
mod session;
mod store;
mod sync;

pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use registry::*;
pub use route::*;
pub use session::*;
pub use store::*;


//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
