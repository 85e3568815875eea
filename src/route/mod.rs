//! Route value objects and the payload serialization seam.

mod codec;
#[allow(clippy::module_inception)]
mod route;

pub use codec::*;
pub use route::*;
