//! Error Types
//!
//! Misuse and structural errors reported by the reactive runtime.
//!
//! Failures inside user compute functions are not represented here: they are
//! panics, and they propagate unchanged to whoever triggered the
//! recomputation (a read, a flush or a batch). See the `reactive` module docs.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors produced by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An operation that needs an owning scope was called outside of one.
    #[error("{operation} requires an active scope")]
    NoOwner {
        /// Name of the operation that was attempted.
        operation: &'static str,
    },

    /// The handle outlived the runtime that created it.
    #[error("the reactive runtime has been dropped")]
    RuntimeDropped,

    /// The node behind a handle has been disposed.
    #[error("node {0} has been disposed")]
    Disposed(NodeId),

    /// A derivation tried to read itself, directly or through other nodes.
    #[error("cycle detected: node {0} was read while it was recomputing")]
    Cycle(NodeId),

    /// Raising a node's height would exceed the configured bound.
    #[error("node {node} would exceed the maximum graph height of {limit}")]
    HeightLimit {
        /// The node whose height could not be raised.
        node: NodeId,
        /// The configured `max_height`.
        limit: usize,
    },

    /// The runtime configuration could not be parsed or is inconsistent.
    #[error("invalid runtime configuration: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
