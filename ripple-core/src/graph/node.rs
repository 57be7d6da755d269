//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//!
//! Every node carries the capabilities shared by all kinds: a subscriber
//! list, a height, scheduler links and an ownership record. Derived and
//! effect nodes additionally carry a [`Derivation`] facet holding their
//! dependency list and update function. Sources and scopes never have one.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use smallvec::SmallVec;

/// Unique identifier for a node in the dependency graph.
///
/// The index addresses the node's arena slot; the stamp is unique per
/// runtime and distinguishes the node from later occupants of the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    stamp: u64,
}

impl NodeId {
    pub(crate) fn new(index: usize, stamp: u64) -> Self {
        Self { index, stamp }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Get the raw, runtime-unique ID value.
    pub fn raw(&self) -> u64 {
        self.stamp
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.stamp)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (cell). These are the roots of the graph.
    /// They have no dependencies, only subscribers.
    Source,

    /// A derived node (memo). These have dependencies and may have
    /// subscribers. They cache their computed value and are lazy.
    Derived,

    /// An effect node. Eager: scheduled whenever a dependency changes,
    /// whether or not anything reads it.
    Effect,

    /// An owner with no value, used only for grouped disposal.
    Scope,
}

bitflags! {
    /// Scheduling state of a node. The bits are independent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeFlags: u8 {
        /// The cached value may be stale and must be recomputed before use.
        const DIRTY = 1 << 0;
        /// The update function is currently running.
        const RECOMPUTING = 1 << 1;
        /// Queued in a height bucket of the dirty heap.
        const IN_HEAP = 1 << 2;
        /// Parked in the fallback list after an out-of-band resolution.
        const IN_FALLBACK = 1 << 3;
    }
}

/// A callback run before a node's next recomputation or on its disposal.
pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// Type-erased update function. Returns true if the node's value changed.
pub(crate) type UpdateFn = Rc<dyn Fn() -> bool>;

/// Intrusive links for whichever scheduler list the node currently sits in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapLink {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// The consumer facet of derived and effect nodes.
pub(crate) struct Derivation {
    /// First edge of the dependency list.
    pub deps_head: Option<usize>,

    /// Last dependency edge confirmed by the current (or last) run. Edges
    /// after it are candidates for reuse while recomputing and are pruned
    /// once the run completes.
    pub deps_tail: Option<usize>,

    /// Height required by the dependencies observed so far in this run.
    pub working_height: usize,

    pub update: UpdateFn,

    /// Eager derivations (effects) are recomputed on every stabilization
    /// even when nothing subscribes to them.
    pub eager: bool,

    pub runs: u64,
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub flags: NodeFlags,

    /// Topological level. Always greater than every current dependency's.
    pub height: usize,

    pub subs_head: Option<usize>,
    pub subs_tail: Option<usize>,

    pub heap: HeapLink,

    /// The owner this node was created under.
    pub parent: Option<usize>,
    pub children: SmallVec<[usize; 4]>,
    pub cleanups: Vec<Cleanup>,

    pub derivation: Option<Derivation>,
}

impl Node {
    fn new(id: NodeId, kind: NodeKind, height: usize) -> Self {
        Self {
            id,
            kind,
            flags: NodeFlags::empty(),
            height,
            subs_head: None,
            subs_tail: None,
            heap: HeapLink::default(),
            parent: None,
            children: SmallVec::new(),
            cleanups: Vec::new(),
            derivation: None,
        }
    }

    /// Create a new source (cell) node.
    pub fn source(id: NodeId) -> Self {
        Self::new(id, NodeKind::Source, 0)
    }

    /// Create a new scope node.
    pub fn scope(id: NodeId) -> Self {
        Self::new(id, NodeKind::Scope, 0)
    }

    /// Create a new derived node. Starts dirty so the first read computes it.
    pub fn derived(id: NodeId, update: UpdateFn, eager: bool) -> Self {
        let kind = if eager { NodeKind::Effect } else { NodeKind::Derived };
        let mut node = Self::new(id, kind, 1);
        node.flags = NodeFlags::DIRTY;
        node.derivation = Some(Derivation {
            deps_head: None,
            deps_tail: None,
            working_height: 0,
            update,
            eager,
            runs: 0,
        });
        node
    }

    /// Whether anything currently depends on this node.
    pub fn has_subscribers(&self) -> bool {
        self.subs_head.is_some()
    }

    /// Derived but not eager: may be left dirty while nobody observes it.
    pub fn is_lazy(&self) -> bool {
        self.derivation.as_ref().is_some_and(|d| !d.eager)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(NodeFlags::DIRTY)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("height", &self.height)
            .field("children", &self.children.len())
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}
