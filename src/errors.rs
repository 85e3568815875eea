//! Route Synchronization Engine Error Hierarchy
//!
//! Defines error types for the client-side route cache, categorized by the
//! collaborator that produced them: the coordination store, the payload
//! codec, or configuration loading.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Coordination-store operation failures (remote round trips)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Route payload encode/decode failures
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Best-effort route writes where some, but not all, entries failed.
    /// Every route in the input set was attempted; `failures` lists the ids
    /// that did not commit together with their individual errors.
    #[error("{} route write(s) failed", failures.len())]
    PartialWrite { failures: Vec<(String, Error)> },

    /// The engine has been shut down; no further operations are permitted
    #[error("engine terminated")]
    Terminated,

    /// Unrecoverable failures requiring caller intervention
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Failure modes of the coordination-store contract (see [`crate::CoordinationSession`]).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed node does not exist
    #[error("no node at {path}")]
    NoNode { path: String },

    /// Creation target already exists
    #[error("node already exists at {path}")]
    NodeExists { path: String },

    /// The session lost its connection mid-operation
    #[error("connection to the coordination store was lost")]
    ConnectionLoss,

    /// The session is expired and will never recover
    #[error("coordination-store session expired")]
    SessionExpired,

    /// Remote round trip exceeded the session timeout
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Malformed or empty tree path
    #[error("invalid path: {0}")]
    BadPath(String),

    /// Store-side failure that maps to no other variant
    #[error("store failure: {0}")]
    Failure(String),
}

impl StoreError {
    pub fn is_no_node(&self) -> bool {
        matches!(self, StoreError::NoNode { .. })
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, StoreError::NodeExists { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("route payload could not be encoded")]
    Encode(#[source] bincode::Error),

    #[error("route payload could not be decoded")]
    Decode(#[source] bincode::Error),
}
