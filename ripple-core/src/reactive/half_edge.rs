//! Half Edges
//!
//! A half edge is a derivation without a value. Triggering it from inside a
//! memo or effect subscribes the caller to it, which keeps the half edge
//! observed: it re-runs whenever one of its own dependencies changes, but
//! since it never reports a change, the caller is not queued by it.
//!
//! This is useful when a computation's side effects, rather than its
//! result, must be current before the caller reads something else. The
//! selector's tracker is built this way.

use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::{Runtime, RuntimeInner};
use crate::error::Result;
use crate::graph::{Node, NodeId, UpdateFn};

/// A subscribe-only derivation.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let mirrored = Rc::new(Cell::new(0));
/// let ((), _scope) = rt.create_scope(|| {
///     let source = rt.create_cell(1);
///     let edge = rt
///         .create_half_edge({
///             let (source, mirrored) = (source.clone(), mirrored.clone());
///             move || mirrored.set(source.get())
///         })
///         .unwrap();
///     rt.create_effect(move || edge.trigger()).unwrap();
///
///     source.set(7);
/// });
/// assert_eq!(mirrored.get(), 7);
/// ```
#[derive(Clone)]
pub struct HalfEdge {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
}

impl Runtime {
    /// Create a half edge owned by the current scope. `run` is not called
    /// until the first trigger.
    pub fn create_half_edge(&self, run: impl Fn() + 'static) -> Result<HalfEdge> {
        let owner = self.owner_for("create_half_edge")?;
        let update: UpdateFn = Rc::new(move || {
            run();
            false
        });

        let id = self
            .inner
            .graph
            .borrow_mut()
            .insert(Some(owner), |id| Node::derived(id, update, false));
        trace!(node = %id, "created half edge");

        Ok(HalfEdge {
            runtime: self.downgrade(),
            id,
        })
    }
}

impl HalfEdge {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Bring the half edge up to date and subscribe the current observer.
    pub fn try_trigger(&self) -> Result<()> {
        let runtime = Runtime::upgrade(&self.runtime)?;
        runtime.batch(|| runtime.read_derived(self.id))
    }

    /// Like [`HalfEdge::try_trigger`].
    ///
    /// # Panics
    ///
    /// Panics if the half edge was disposed, its runtime dropped, or it is
    /// triggered from inside its own run.
    pub fn trigger(&self) {
        if let Err(err) = self.try_trigger() {
            panic!("{err}");
        }
    }

    /// How many times the half edge has run to completion.
    pub fn run_count(&self) -> Result<u64> {
        Runtime::upgrade(&self.runtime)?
            .inspect(self.id, |node| node.derivation.as_ref().map_or(0, |d| d.runs))
    }

    pub fn subscriber_count(&self) -> usize {
        Runtime::upgrade(&self.runtime)
            .map(|runtime| runtime.subscriber_count(self.id))
            .unwrap_or(0)
    }

    /// Dispose the half edge and everything its runs created.
    pub fn dispose(&self) {
        if let Ok(runtime) = Runtime::upgrade(&self.runtime) {
            runtime.dispose(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        Runtime::upgrade(&self.runtime)
            .and_then(|runtime| runtime.inspect(self.id, |_| ()))
            .is_err()
    }
}

impl fmt::Debug for HalfEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalfEdge")
            .field("id", &self.id)
            .field("run_count", &self.run_count().ok())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
