//! Dirty Scheduler
//!
//! The scheduler holds every derivation known to need recomputation and
//! hands them out in topological order.
//!
//! # Algorithm
//!
//! Nodes are bucketed by height. Each bucket is an intrusive FIFO list
//! threaded through the node records, so insertion, removal and moving a
//! node between buckets are all O(1):
//!
//! 1. A write inserts the direct subscribers of the written cell at their
//!    current heights (shallow push).
//! 2. `pop_min` always returns the oldest node of the lowest non-empty
//!    bucket. Since a node's height exceeds every dependency's height, all
//!    dependencies pending at that moment are recomputed first.
//! 3. Recomputing a node that changed inserts its subscribers, which sit at
//!    greater heights, so a single ascending sweep reaches them.
//!
//! `min_dirty`/`max_dirty` bound the non-empty range so the sweep skips
//! empty heights cheaply.
//!
//! A separate fallback list parks nodes that were resolved out of band (a
//! read that raced ahead of the sweep). A node is in at most one of the
//! height buckets and the fallback list, as recorded by its flags.

use slab::Slab;

use super::node::{HeapLink, Node, NodeFlags};

/// Head and tail of one intrusive list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Bucket {
    head: Option<usize>,
    tail: Option<usize>,
}

impl Bucket {
    fn push_back(&mut self, nodes: &mut Slab<Node>, idx: usize) {
        let tail = self.tail;
        nodes[idx].heap = HeapLink { prev: tail, next: None };
        match tail {
            Some(t) => nodes[t].heap.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn detach(&mut self, nodes: &mut Slab<Node>, idx: usize) {
        let HeapLink { prev, next } = nodes[idx].heap;
        match prev {
            Some(p) => nodes[p].heap.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => nodes[n].heap.prev = prev,
            None => self.tail = prev,
        }
        nodes[idx].heap = HeapLink::default();
    }
}

/// Height-bucketed set of pending derivations plus the fallback list.
#[derive(Debug)]
pub(crate) struct DirtyHeap {
    buckets: Vec<Bucket>,
    fallback: Bucket,
    min_dirty: usize,
    max_dirty: usize,
    len: usize,
}

impl DirtyHeap {
    /// Create an empty heap with `capacity` preallocated height buckets.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: vec![Bucket::default(); capacity.max(1)],
            fallback: Bucket::default(),
            min_dirty: usize::MAX,
            max_dirty: 0,
            len: 0,
        }
    }

    /// Number of nodes queued in height buckets.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowest height that may hold a pending node.
    pub fn min_pending(&self) -> usize {
        if self.len == 0 {
            usize::MAX
        } else {
            self.min_dirty
        }
    }

    fn ensure_height(&mut self, height: usize) {
        if height >= self.buckets.len() {
            self.buckets.resize(height + 1, Bucket::default());
        }
    }

    fn widen(&mut self, height: usize) {
        self.min_dirty = self.min_dirty.min(height);
        self.max_dirty = self.max_dirty.max(height);
    }

    /// Queue a node at its current height and mark it dirty.
    ///
    /// Idempotent. No-op for nodes that are already queued or are being
    /// recomputed, since those will be evaluated fresh anyway. Returns
    /// whether the node was newly queued.
    pub fn insert(&mut self, nodes: &mut Slab<Node>, idx: usize) -> bool {
        let flags = nodes[idx].flags;
        if flags.intersects(NodeFlags::IN_HEAP | NodeFlags::RECOMPUTING) {
            return false;
        }
        if flags.contains(NodeFlags::IN_FALLBACK) {
            self.fallback.detach(nodes, idx);
            nodes[idx].flags.remove(NodeFlags::IN_FALLBACK);
        }

        let height = nodes[idx].height;
        self.ensure_height(height);
        self.buckets[height].push_back(nodes, idx);
        nodes[idx].flags.insert(NodeFlags::DIRTY | NodeFlags::IN_HEAP);
        self.len += 1;
        self.widen(height);
        true
    }

    /// Take a node out of whichever list it is in. Its dirty bit is kept.
    pub fn remove(&mut self, nodes: &mut Slab<Node>, idx: usize) {
        let flags = nodes[idx].flags;
        if flags.contains(NodeFlags::IN_HEAP) {
            let height = nodes[idx].height;
            self.buckets[height].detach(nodes, idx);
            nodes[idx].flags.remove(NodeFlags::IN_HEAP);
            self.len -= 1;
        }
        if flags.contains(NodeFlags::IN_FALLBACK) {
            self.fallback.detach(nodes, idx);
            nodes[idx].flags.remove(NodeFlags::IN_FALLBACK);
        }
    }

    /// Remove and return the oldest node at the lowest pending height.
    pub fn pop_min(&mut self, nodes: &mut Slab<Node>) -> Option<usize> {
        if self.len == 0 {
            self.min_dirty = usize::MAX;
            self.max_dirty = 0;
            return None;
        }
        while self.min_dirty <= self.max_dirty {
            if let Some(idx) = self.buckets[self.min_dirty].head {
                self.buckets[self.min_dirty].detach(nodes, idx);
                nodes[idx].flags.remove(NodeFlags::IN_HEAP);
                self.len -= 1;
                return Some(idx);
            }
            self.min_dirty += 1;
        }
        None
    }

    /// Park a node that is about to be resolved out of band.
    pub fn move_to_fallback(&mut self, nodes: &mut Slab<Node>, idx: usize) {
        if nodes[idx].flags.contains(NodeFlags::IN_FALLBACK) {
            return;
        }
        self.remove(nodes, idx);
        self.fallback.push_back(nodes, idx);
        nodes[idx].flags.insert(NodeFlags::IN_FALLBACK);
    }

    /// Release every node parked in the fallback list.
    pub fn clear_fallback(&mut self, nodes: &mut Slab<Node>) {
        let mut cursor = self.fallback.head;
        while let Some(idx) = cursor {
            cursor = nodes[idx].heap.next;
            nodes[idx].heap = HeapLink::default();
            nodes[idx].flags.remove(NodeFlags::IN_FALLBACK);
        }
        self.fallback = Bucket::default();
    }

    /// Change a node's height, moving it to the matching bucket if queued.
    pub fn reposition(&mut self, nodes: &mut Slab<Node>, idx: usize, height: usize) {
        if !nodes[idx].flags.contains(NodeFlags::IN_HEAP) {
            nodes[idx].height = height;
            return;
        }
        let old = nodes[idx].height;
        self.buckets[old].detach(nodes, idx);
        nodes[idx].height = height;
        self.ensure_height(height);
        self.buckets[height].push_back(nodes, idx);
        self.widen(height);
    }

    #[cfg(test)]
    fn fallback_nodes(&self, nodes: &Slab<Node>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = self.fallback.head;
        while let Some(idx) = cursor {
            out.push(idx);
            cursor = nodes[idx].heap.next;
        }
        out
    }
}
