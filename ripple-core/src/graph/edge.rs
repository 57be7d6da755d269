//! Dependency Edges
//!
//! An edge records that one subscriber read one dependency. It is threaded
//! through two doubly-linked lists at once: the dependency's subscriber list
//! (`prev_sub`/`next_sub`) and the subscriber's dependency list
//! (`prev_dep`/`next_dep`). Edges live in a slab and refer to nodes and to
//! each other by index, so unlinking is O(1) on both sides.

/// A bidirectional record connecting one dependency to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Edge {
    /// The node that was read.
    pub dep: usize,
    /// The derivation that read it.
    pub sub: usize,

    pub prev_dep: Option<usize>,
    pub next_dep: Option<usize>,

    pub prev_sub: Option<usize>,
    pub next_sub: Option<usize>,
}

impl Edge {
    pub fn new(dep: usize, sub: usize) -> Self {
        Self {
            dep,
            sub,
            prev_dep: None,
            next_dep: None,
            prev_sub: None,
            next_sub: None,
        }
    }
}
