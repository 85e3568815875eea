//! Session lifecycle: the connectivity gate other components wait on, and
//! the manager that owns the store session and recreates it on loss.

mod gate;
mod manager;

pub use gate::*;
pub use manager::*;
