//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, memos and
//! effects. It owns the dependency graph, the context stack and the dirty
//! scheduler, and it is the only place where user code is invoked.
//!
//! # How It Works
//!
//! 1. When a cell is written, its direct subscribers are queued in the
//!    dirty heap at their current heights.
//!
//! 2. When the outermost batch closes, `stabilize` pops queued derivations
//!    lowest height first and recomputes them. A derivation whose value
//!    changed queues its own subscribers, which sit higher up, so the sweep
//!    reaches them later in the same pass.
//!
//! 3. A read that races ahead of the sweep resolves the reader's
//!    dependencies depth-first before recomputing it, so reads are always
//!    consistent even in the middle of a batch.
//!
//! # Failure
//!
//! A compute function that panics leaves its node dirty but does not
//! re-queue it, so a later `stabilize` does not retry it; the next change
//! to one of its dependencies, or a direct read of a memo, does.
//!
//! # Borrowing Discipline
//!
//! The graph sits in a `RefCell`. Every method here releases its borrow
//! before calling a compute function, an equality function or a cleanup,
//! because those may read and write reactive state themselves.
//!
//! # Threading
//!
//! A runtime is confined to the thread that created it. Handles hold a weak
//! reference, so closures stored in the graph may capture handles without
//! keeping the runtime alive.

use std::cell::{Cell as Flag, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, debug_span, trace, warn};

use super::context::{ContextStack, Frame};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{Graph, GraphStats, Node, NodeFlags, NodeId, Teardown};

/// A task queued with [`Runtime::defer`].
type Deferred = Box<dyn FnOnce()>;

pub(crate) struct RuntimeInner {
    pub(crate) graph: RefCell<Graph>,
    pub(crate) context: ContextStack,
    pub(super) batch_depth: Flag<usize>,
    pub(super) stabilizing: Flag<bool>,
    draining: Flag<bool>,
    deferred: RefCell<VecDeque<Deferred>>,
    config: RuntimeConfig,
}

/// Handle to a reactive graph.
///
/// Cloning a `Runtime` is cheap and yields another handle to the same graph.
/// Independent runtimes never share state.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let (total, scope) = rt.create_scope(|| {
///     let a = rt.create_cell(2);
///     let b = rt.create_cell(3);
///     let product = rt.create_memo({
///         let (a, b) = (a.clone(), b.clone());
///         move || a.get() * b.get()
///     })?;
///     assert_eq!(product.get(), 6);
///
///     rt.batch(|| {
///         a.set(3);
///         b.set(4);
///     });
///     product.try_get()
/// });
/// assert_eq!(total.unwrap(), 12);
/// scope.dispose();
/// ```
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Create a runtime with a validated configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                graph: RefCell::new(Graph::new(&config)),
                context: ContextStack::default(),
                batch_depth: Flag::new(0),
                stabilizing: Flag::new(false),
                draining: Flag::new(false),
                deferred: RefCell::new(VecDeque::new()),
                config,
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<RuntimeInner>) -> Result<Self> {
        weak.upgrade()
            .map(|inner| Self { inner })
            .ok_or(Error::RuntimeDropped)
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Rc::downgrade(&self.inner)
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Current size and activity counters of the graph.
    pub fn stats(&self) -> GraphStats {
        self.inner.graph.borrow().stats()
    }

    /// Whether a tracking context is active, i.e. reads will create edges.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.observer().is_some()
    }

    /// Run `f` without tracking: reads inside it create no dependency
    /// edges. The current owner is kept, so nodes created inside are still
    /// owned as usual.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let owner = self.inner.context.owner();
        let _ctx = self.inner.context.enter(Frame { observer: None, owner });
        f()
    }

    pub(crate) fn inspect<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Result<R> {
        self.inner.graph.borrow().node(id).map(f)
    }

    /// Number of direct subscribers of a node; zero once it is disposed.
    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        let graph = self.inner.graph.borrow();
        graph.lookup(id).map(|idx| graph.subscriber_count(idx)).unwrap_or(0)
    }

    pub(crate) fn dependency_count(&self, id: NodeId) -> usize {
        let graph = self.inner.graph.borrow();
        graph.lookup(id).map(|idx| graph.dependency_count(idx)).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    pub(crate) fn current_owner(&self) -> Option<usize> {
        self.inner.context.owner()
    }

    pub(crate) fn owner_for(&self, operation: &'static str) -> Result<usize> {
        let owner = self.current_owner();
        let graph = self.inner.graph.borrow();
        owner
            .filter(|idx| graph.nodes.contains(*idx))
            .ok_or(Error::NoOwner { operation })
    }

    /// Run `f` untracked with `owner` receiving anything it creates.
    pub(crate) fn with_owner<R>(&self, owner: NodeId, f: impl FnOnce() -> R) -> Result<R> {
        let idx = self.inner.graph.borrow().lookup(owner)?;
        let _ctx = self.inner.context.enter(Frame { observer: None, owner: Some(idx) });
        Ok(f())
    }

    /// Tear down a node and everything it owns, then run the collected
    /// cleanups. Disposing an already disposed node is a no-op.
    pub(crate) fn dispose(&self, id: NodeId) {
        let mut teardown = Teardown::default();
        {
            let mut graph = self.inner.graph.borrow_mut();
            let Ok(idx) = graph.lookup(id) else {
                return;
            };
            graph.dispose(idx, &mut teardown);
        }
        debug!(node = %id, released = teardown.released.len(), "disposed");
        self.batch(|| teardown.run());
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Link the node as a dependency of the current observer, if any.
    pub(crate) fn track(&self, id: NodeId) {
        let Some(observer) = self.inner.context.observer() else {
            return;
        };
        let mut graph = self.inner.graph.borrow_mut();
        let observing = graph
            .nodes
            .get(observer)
            .is_some_and(|node| node.flags.contains(NodeFlags::RECOMPUTING));
        if !observing {
            return;
        }
        match graph.lookup(id) {
            Ok(idx) => graph.link(idx, observer),
            Err(_) => warn!(node = %id, "read of a disposed node is not tracked"),
        }
    }

    /// Bring a derivation up to date and link it into the current observer.
    pub(crate) fn read_derived(&self, id: NodeId) -> Result<()> {
        let idx = self.inner.graph.borrow().lookup(id)?;
        self.resolve(idx, false)?;
        self.track(id);
        Ok(())
    }

    /// Out-of-band resolution.
    ///
    /// While work is pending in the heap, every derived dependency that may
    /// be affected is resolved first, depth-first. If the node is dirty
    /// afterwards it is parked in the fallback list, so the sweep does not
    /// process it a second time, and recomputed on the spot.
    ///
    /// `upstream` is set while walking dependencies: a node found
    /// recomputing there is an ancestor in the current call chain reached
    /// through a stale edge, not a cycle.
    fn resolve(&self, idx: usize, upstream: bool) -> Result<()> {
        let deps = {
            let graph = self.inner.graph.borrow();
            let node = &graph.nodes[idx];
            if node.derivation.is_none() {
                return Ok(());
            }
            if node.flags.contains(NodeFlags::RECOMPUTING) {
                return if upstream { Ok(()) } else { Err(Error::Cycle(node.id)) };
            }
            if graph.heap.is_empty() {
                Default::default()
            } else {
                graph.unsettled_dependencies(idx)
            }
        };

        for dep in deps {
            let Ok(dep_idx) = self.inner.graph.borrow().lookup(dep) else {
                continue;
            };
            self.resolve(dep_idx, true)?;
        }

        let dirty = {
            let mut graph = self.inner.graph.borrow_mut();
            let graph = &mut *graph;
            let dirty = graph
                .nodes
                .get(idx)
                .is_some_and(|node| node.is_dirty() && !node.flags.contains(NodeFlags::RECOMPUTING));
            if dirty {
                graph.heap.move_to_fallback(&mut graph.nodes, idx);
            }
            dirty
        };
        if dirty {
            trace!(slot = idx, "resolving out of band");
            self.recompute(idx)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recomputation
    // ------------------------------------------------------------------

    /// Run a derivation's update function and settle its edges, height and
    /// subscribers.
    pub(crate) fn recompute(&self, idx: usize) -> Result<()> {
        let mut teardown = Teardown::default();
        let (id, update) = {
            let mut graph = self.inner.graph.borrow_mut();
            graph.release_owned(idx, &mut teardown);
            let id = graph.nodes[idx].id;
            match graph.begin_recompute(idx) {
                Some(update) => (id, update),
                None => return Ok(()),
            }
        };

        let guard = RecomputeGuard {
            runtime: self,
            id,
            finished: false,
        };
        teardown.run();

        let changed = {
            let _ctx = self.inner.context.enter(Frame {
                observer: Some(idx),
                owner: Some(idx),
            });
            update()
        };
        guard.finish(changed)
    }

    // ------------------------------------------------------------------
    // Stabilization
    // ------------------------------------------------------------------

    /// Recompute every queued derivation in ascending height order.
    ///
    /// Lazy derivations nobody subscribes to are left dirty instead; the
    /// next read recomputes them. A call made while a pass is already
    /// running returns immediately, since the running pass picks up any
    /// newly queued work.
    ///
    /// If a recomputation fails the pass stops; everything still queued
    /// stays queued for the next flush.
    pub fn stabilize(&self) -> Result<()> {
        if self.inner.stabilizing.replace(true) {
            return Ok(());
        }
        let _guard = StabilizeGuard(&self.inner);
        let span = debug_span!("stabilize", pending = self.inner.graph.borrow().heap.len());
        let _enter = span.enter();

        let mut recomputed = 0usize;
        loop {
            let next = {
                let mut graph = self.inner.graph.borrow_mut();
                let graph = &mut *graph;
                let Some(idx) = graph.heap.pop_min(&mut graph.nodes) else {
                    break;
                };
                let node = &graph.nodes[idx];
                if node.is_lazy() && !node.has_subscribers() {
                    trace!(node = %node.id, "left dirty: no subscribers");
                    continue;
                }
                idx
            };
            self.recompute(next)?;
            recomputed += 1;
        }

        {
            let mut graph = self.inner.graph.borrow_mut();
            let graph = &mut *graph;
            graph.heap.clear_fallback(&mut graph.nodes);
        }
        debug!(recomputed, "stabilized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred tasks
    // ------------------------------------------------------------------

    /// Queue `task` to run after the current flush completes.
    ///
    /// This is the engine's microtask queue: tasks run once the outermost
    /// batch has stabilized, each in its own batch.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.deferred.borrow_mut().push_back(Box::new(task));
    }

    /// Run every deferred task, including tasks queued while draining.
    pub fn run_deferred(&self) {
        if self.inner.draining.replace(true) {
            return;
        }
        let _guard = DrainGuard(&self.inner);
        loop {
            let task = self.inner.deferred.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            self.batch(task);
        }
    }

    /// Number of tasks waiting in the deferred queue.
    pub fn deferred_len(&self) -> usize {
        self.inner.deferred.borrow().len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("stats", &self.stats())
            .field("batch_depth", &self.batch_depth())
            .field("context_depth", &self.inner.context.depth())
            .finish()
    }
}

/// Completes or unwinds a recomputation.
///
/// On the panic path the node keeps its previous value, edges observed
/// before the failure survive, later ones are pruned, and the node stays
/// dirty.
struct RecomputeGuard<'a> {
    runtime: &'a Runtime,
    id: NodeId,
    finished: bool,
}

impl RecomputeGuard<'_> {
    fn finish(mut self, changed: bool) -> Result<()> {
        self.finished = true;
        let mut teardown = Teardown::default();
        let result = {
            let mut graph = self.runtime.inner.graph.borrow_mut();
            match graph.lookup(self.id) {
                Ok(idx) => graph.end_recompute(idx, changed, &mut teardown),
                // Disposed by its own computation.
                Err(_) => Ok(()),
            }
        };
        trace!(node = %self.id, changed, "recomputed");
        teardown.run();
        result
    }
}

impl Drop for RecomputeGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut teardown = Teardown::default();
        if let Ok(mut graph) = self.runtime.inner.graph.try_borrow_mut() {
            if let Ok(idx) = graph.lookup(self.id) {
                graph.abort_recompute(idx, &mut teardown);
            }
        }
        debug!(node = %self.id, "recomputation aborted");
        // Cleanups must not run while unwinding; hand them to the queue.
        if !teardown.is_empty() {
            self.runtime.defer(move || teardown.run());
        }
    }
}

struct StabilizeGuard<'a>(&'a RuntimeInner);

impl Drop for StabilizeGuard<'_> {
    fn drop(&mut self) {
        self.0.stabilizing.set(false);
    }
}

struct DrainGuard<'a>(&'a RuntimeInner);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.draining.set(false);
    }
}
