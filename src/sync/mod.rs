//! Route cache and synchronization engine.

mod cache;
mod engine;

pub(crate) use cache::*;
pub(crate) use engine::*;
