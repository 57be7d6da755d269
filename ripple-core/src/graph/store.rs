//! Graph Store
//!
//! Arena storage for nodes and edges, and every structural mutation of the
//! graph: linking on read, pruning stale dependencies, height maintenance,
//! shallow dirty pushes, unobserve and disposal.
//!
//! Nothing in here runs user code. Cleanup callbacks and dropped node
//! records are collected into a [`Teardown`] that the caller runs after it
//! has released its borrow of the graph.

use std::mem;

use slab::Slab;
use smallvec::SmallVec;
use tracing::trace;

use super::edge::Edge;
use super::node::{Cleanup, Node, NodeFlags, NodeId, UpdateFn};
use super::scheduler::DirtyHeap;
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};

/// Work collected during a structural change that must run outside the
/// graph borrow.
#[derive(Default)]
pub(crate) struct Teardown {
    pub cleanups: Vec<Cleanup>,
    pub released: Vec<Node>,
}

impl Teardown {
    pub fn is_empty(&self) -> bool {
        self.cleanups.is_empty() && self.released.is_empty()
    }

    /// Drop released nodes, then run cleanups in collection order.
    pub fn run(self) {
        drop(self.released);
        for cleanup in self.cleanups {
            cleanup();
        }
    }
}

/// Snapshot of graph size and activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GraphStats {
    /// Live nodes of every kind.
    pub nodes: usize,
    /// Live dependency edges.
    pub edges: usize,
    /// Derivations queued for the next stabilization.
    pub pending: usize,
    /// Total recomputations performed since the runtime was created.
    pub recomputations: u64,
}

/// Node and edge arenas plus the dirty scheduler.
pub(crate) struct Graph {
    pub nodes: Slab<Node>,
    pub edges: Slab<Edge>,
    pub heap: DirtyHeap,
    next_stamp: u64,
    max_height: usize,
    recomputations: u64,
}

impl Graph {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            nodes: Slab::new(),
            edges: Slab::new(),
            heap: DirtyHeap::with_capacity(config.initial_heap_capacity),
            next_stamp: 0,
            max_height: config.max_height,
            recomputations: 0,
        }
    }

    /// Allocate a node and attach it to `parent`'s children.
    pub fn insert(&mut self, parent: Option<usize>, make: impl FnOnce(NodeId) -> Node) -> NodeId {
        let entry = self.nodes.vacant_entry();
        let id = NodeId::new(entry.key(), self.next_stamp);
        self.next_stamp += 1;
        let mut node = make(id);
        node.parent = parent;
        entry.insert(node);
        if let Some(owner) = parent.and_then(|p| self.nodes.get_mut(p)) {
            owner.children.push(id.index());
        }
        id
    }

    /// Resolve a handle to its slot, rejecting stale handles.
    pub fn lookup(&self, id: NodeId) -> Result<usize> {
        match self.nodes.get(id.index()) {
            Some(node) if node.id == id => Ok(id.index()),
            _ => Err(Error::Disposed(id)),
        }
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.lookup(id).map(|idx| &self.nodes[idx])
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            pending: self.heap.len(),
            recomputations: self.recomputations,
        }
    }

    pub fn subscriber_count(&self, idx: usize) -> usize {
        let mut count = 0;
        let mut cursor = self.nodes[idx].subs_head;
        while let Some(e) = cursor {
            count += 1;
            cursor = self.edges[e].next_sub;
        }
        count
    }

    pub fn dependency_count(&self, idx: usize) -> usize {
        let mut count = 0;
        let mut cursor = self.nodes[idx].derivation.as_ref().and_then(|d| d.deps_head);
        while let Some(e) = cursor {
            count += 1;
            cursor = self.edges[e].next_dep;
        }
        count
    }

    fn subscribers(&self, idx: usize) -> SmallVec<[usize; 8]> {
        let mut out = SmallVec::new();
        let mut cursor = self.nodes[idx].subs_head;
        while let Some(e) = cursor {
            out.push(self.edges[e].sub);
            cursor = self.edges[e].next_sub;
        }
        out
    }

    /// Derived dependencies of `idx` that may still have pending work
    /// upstream. Dependencies below the lowest pending height that are not
    /// dirty themselves cannot, and are skipped.
    pub fn unsettled_dependencies(&self, idx: usize) -> SmallVec<[NodeId; 8]> {
        let mut out = SmallVec::new();
        let Some(derivation) = self.nodes[idx].derivation.as_ref() else {
            return out;
        };
        let floor = self.heap.min_pending();
        let mut cursor = derivation.deps_head;
        while let Some(e) = cursor {
            let dep = &self.nodes[self.edges[e].dep];
            if dep.derivation.is_some() && (dep.is_dirty() || dep.height >= floor) {
                out.push(dep.id);
            }
            cursor = self.edges[e].next_dep;
        }
        out
    }

    // ------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------

    /// Record that `sub`, which is recomputing, read `dep`.
    ///
    /// Reuses the next expected edge when the read order matches the
    /// previous run; otherwise splices a new edge in after the tail.
    pub fn link(&mut self, dep: usize, sub: usize) {
        let dep_height = self.nodes[dep].height;
        let Some(derivation) = self.nodes[sub].derivation.as_mut() else {
            return;
        };
        derivation.working_height = derivation.working_height.max(dep_height + 1);
        let tail = derivation.deps_tail;
        let head = derivation.deps_head;

        if let Some(t) = tail {
            if self.edges[t].dep == dep {
                return;
            }
        }
        let next = match tail {
            Some(t) => self.edges[t].next_dep,
            None => head,
        };
        if let Some(n) = next {
            if self.edges[n].dep == dep {
                self.set_deps_tail(sub, Some(n));
                return;
            }
        }
        // A nested recomputation may have appended to `dep`'s subscribers
        // since this run first read it, so the newest edge is not enough.
        if self.nodes[dep].has_subscribers() && self.has_confirmed(sub, dep) {
            return;
        }

        let prev_sub = self.nodes[dep].subs_tail;
        let e = self.edges.insert(Edge {
            prev_dep: tail,
            next_dep: next,
            prev_sub,
            ..Edge::new(dep, sub)
        });
        if let Some(n) = next {
            self.edges[n].prev_dep = Some(e);
        }
        match tail {
            Some(t) => self.edges[t].next_dep = Some(e),
            None => {
                if let Some(d) = self.nodes[sub].derivation.as_mut() {
                    d.deps_head = Some(e);
                }
            }
        }
        self.set_deps_tail(sub, Some(e));
        match prev_sub {
            Some(p) => self.edges[p].next_sub = Some(e),
            None => self.nodes[dep].subs_head = Some(e),
        }
        self.nodes[dep].subs_tail = Some(e);
        trace!(dep = %self.nodes[dep].id, sub = %self.nodes[sub].id, "linked");
    }

    fn set_deps_tail(&mut self, sub: usize, tail: Option<usize>) {
        if let Some(d) = self.nodes[sub].derivation.as_mut() {
            d.deps_tail = tail;
        }
    }

    /// Whether the part of `sub`'s dependency list already confirmed by the
    /// current run holds an edge from `dep`.
    fn has_confirmed(&self, sub: usize, dep: usize) -> bool {
        let Some(derivation) = self.nodes[sub].derivation.as_ref() else {
            return false;
        };
        let Some(tail) = derivation.deps_tail else {
            return false;
        };
        let mut cursor = derivation.deps_head;
        while let Some(e) = cursor {
            if self.edges[e].dep == dep {
                return true;
            }
            if e == tail {
                return false;
            }
            cursor = self.edges[e].next_dep;
        }
        false
    }

    /// Remove an edge from both of its lists and free it.
    ///
    /// With `cascade`, a lazy derivation left without subscribers is
    /// detached from its own dependencies.
    pub fn unlink(&mut self, e: usize, cascade: bool, teardown: &mut Teardown) {
        let edge = self.edges.remove(e);

        match edge.prev_sub {
            Some(p) => self.edges[p].next_sub = edge.next_sub,
            None => self.nodes[edge.dep].subs_head = edge.next_sub,
        }
        match edge.next_sub {
            Some(n) => self.edges[n].prev_sub = edge.prev_sub,
            None => self.nodes[edge.dep].subs_tail = edge.prev_sub,
        }

        if let Some(n) = edge.next_dep {
            self.edges[n].prev_dep = edge.prev_dep;
        }
        match edge.prev_dep {
            Some(p) => self.edges[p].next_dep = edge.next_dep,
            None => {
                if let Some(d) = self.nodes[edge.sub].derivation.as_mut() {
                    d.deps_head = edge.next_dep;
                }
            }
        }
        if let Some(d) = self.nodes[edge.sub].derivation.as_mut() {
            if d.deps_tail == Some(e) {
                d.deps_tail = edge.prev_dep;
            }
        }

        if cascade && !self.nodes[edge.dep].has_subscribers() {
            self.unobserve(edge.dep, teardown);
        }
    }

    fn unlink_dependencies(&mut self, idx: usize, teardown: &mut Teardown) {
        let Some(derivation) = self.nodes[idx].derivation.as_mut() else {
            return;
        };
        let mut cursor = derivation.deps_head;
        derivation.deps_tail = None;
        while let Some(e) = cursor {
            cursor = self.edges[e].next_dep;
            self.unlink(e, true, teardown);
        }
    }

    /// Drop every dependency edge the last run did not confirm.
    pub fn prune_stale_dependencies(&mut self, sub: usize, teardown: &mut Teardown) {
        let Some(derivation) = self.nodes[sub].derivation.as_ref() else {
            return;
        };
        let mut cursor = match derivation.deps_tail {
            Some(t) => self.edges[t].next_dep,
            None => derivation.deps_head,
        };
        while let Some(e) = cursor {
            cursor = self.edges[e].next_dep;
            self.unlink(e, true, teardown);
        }
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Queue a derivation in the dirty heap.
    pub fn schedule(&mut self, idx: usize) -> bool {
        self.heap.insert(&mut self.nodes, idx)
    }

    /// Shallow push: queue every direct subscriber of `idx`.
    pub fn push_subscribers(&mut self, idx: usize) {
        for sub in self.subscribers(idx) {
            if self.heap.insert(&mut self.nodes, sub) {
                trace!(node = %self.nodes[sub].id, height = self.nodes[sub].height, "scheduled");
            }
        }
    }

    /// Raise a node's height, and transitively the heights of subscribers
    /// that would no longer sit strictly above it. Heights never decrease.
    pub fn raise_height(&mut self, idx: usize, height: usize) -> Result<()> {
        if height <= self.nodes[idx].height {
            return Ok(());
        }
        if height > self.max_height {
            return Err(Error::HeightLimit {
                node: self.nodes[idx].id,
                limit: self.max_height,
            });
        }
        trace!(node = %self.nodes[idx].id, from = self.nodes[idx].height, to = height, "raising height");
        self.heap.reposition(&mut self.nodes, idx, height);
        for sub in self.subscribers(idx) {
            self.raise_height(sub, height + 1)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recomputation bookkeeping
    // ------------------------------------------------------------------

    /// Prepare `idx` for a run: mark it recomputing and rewind its
    /// dependency cursor so the run can reuse existing edges.
    pub fn begin_recompute(&mut self, idx: usize) -> Option<UpdateFn> {
        let node = &mut self.nodes[idx];
        let derivation = node.derivation.as_mut()?;
        node.flags.insert(NodeFlags::RECOMPUTING);
        derivation.deps_tail = None;
        derivation.working_height = 0;
        Some(derivation.update.clone())
    }

    /// Complete a successful run: prune, settle the height, clear the dirty
    /// bit and push subscribers if the value changed. A height over the
    /// limit is reported after the push.
    pub fn end_recompute(&mut self, idx: usize, changed: bool, teardown: &mut Teardown) -> Result<()> {
        self.prune_stale_dependencies(idx, teardown);
        self.nodes[idx].flags.remove(NodeFlags::RECOMPUTING);
        self.recomputations += 1;

        let working_height = match self.nodes[idx].derivation.as_mut() {
            Some(derivation) => {
                derivation.runs += 1;
                derivation.working_height
            }
            None => 0,
        };
        // The new value is already committed, so subscribers are queued
        // even when the height could not be raised.
        let raised = self.raise_height(idx, working_height);

        self.nodes[idx].flags.remove(NodeFlags::DIRTY);
        if changed {
            self.push_subscribers(idx);
        }
        raised
    }

    /// Unwind a failed run. Edges observed before the failure are kept,
    /// the rest are pruned, and the node stays dirty.
    pub fn abort_recompute(&mut self, idx: usize, teardown: &mut Teardown) {
        self.prune_stale_dependencies(idx, teardown);
        self.nodes[idx].flags.remove(NodeFlags::RECOMPUTING);
    }

    // ------------------------------------------------------------------
    // Ownership and disposal
    // ------------------------------------------------------------------

    /// Dispose everything `idx` owns and collect its cleanups, leaving the
    /// node itself in place. Runs before every recomputation.
    pub fn release_owned(&mut self, idx: usize, teardown: &mut Teardown) {
        let children = mem::take(&mut self.nodes[idx].children);
        for child in children {
            self.dispose(child, teardown);
        }
        teardown.cleanups.append(&mut self.nodes[idx].cleanups);
    }

    /// Detach a lazy derivation nobody observes any more. It keeps its slot
    /// and cached value but drops its dependencies and is left dirty, so the
    /// next read recomputes and relinks it.
    pub fn unobserve(&mut self, idx: usize, teardown: &mut Teardown) {
        let node = &self.nodes[idx];
        if !node.is_lazy() || node.has_subscribers() || node.flags.contains(NodeFlags::RECOMPUTING) {
            return;
        }
        trace!(node = %node.id, "unobserved");
        self.heap.remove(&mut self.nodes, idx);
        self.release_owned(idx, teardown);
        self.unlink_dependencies(idx, teardown);
        self.nodes[idx].flags.insert(NodeFlags::DIRTY);
    }

    /// Tear a node down: children first (depth-first), then its own edges;
    /// cleanups are collected children-first.
    pub fn dispose(&mut self, idx: usize, teardown: &mut Teardown) {
        if !self.nodes.contains(idx) {
            return;
        }
        let children = mem::take(&mut self.nodes[idx].children);
        for child in children {
            self.dispose(child, teardown);
        }

        self.heap.remove(&mut self.nodes, idx);
        self.unlink_dependencies(idx, teardown);
        let mut cursor = self.nodes[idx].subs_head;
        while let Some(e) = cursor {
            cursor = self.edges[e].next_sub;
            self.unlink(e, false, teardown);
        }
        teardown.cleanups.append(&mut self.nodes[idx].cleanups);

        if let Some(owner) = self.nodes[idx].parent.and_then(|p| self.nodes.get_mut(p)) {
            owner.children.retain(|child| *child != idx);
        }
        let node = self.nodes.remove(idx);
        trace!(node = %node.id, kind = ?node.kind, "disposed");
        teardown.released.push(node);
    }
}
