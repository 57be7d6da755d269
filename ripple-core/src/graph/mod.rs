//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values and computations.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent sources (cells), derivations (memos, effects) or
//!   owners with no value (scopes)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a cell changes, only its direct subscribers are queued. Each
//! recomputation that actually changes a value queues the next layer, and the
//! scheduler processes the queue in height order, so every node runs at most
//! once per flush and never sees a partially updated input.
//!
//! # Design Decisions
//!
//! 1. Nodes and edges live in slab arenas and refer to each other by index.
//!    Handles carry a generation stamp so a reused slot is never mistaken for
//!    the node that used to live there.
//!
//! 2. Each edge sits in two intrusive doubly-linked lists at once (the
//!    dependency's subscribers and the subscriber's dependencies), so a
//!    single O(1) unlink serves pruning, unobserve and disposal.
//!
//! 3. Heights give a topological order without ever sorting: a node's
//!    height is strictly greater than that of everything it reads.

mod edge;
mod node;
mod scheduler;
mod store;

pub use node::{NodeId, NodeKind};
pub use store::GraphStats;

pub(crate) use node::{Node, NodeFlags, UpdateFn};
pub(crate) use store::{Graph, Teardown};
