//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and is a
//! source node in the dependency graph.
//!
//! # How Cells Work
//!
//! 1. When a cell is read while a derivation is recomputing, the derivation
//!    is linked as a subscriber.
//!
//! 2. When a cell is written with a value its equality function considers
//!    different, every direct subscriber is queued (shallow push). Deeper
//!    nodes are only queued once their own dependency actually changes.
//!
//! 3. The write happens inside a batch, so the queued work is flushed as
//!    soon as the outermost batch closes.
//!
//! # Memory Layout
//!
//! The graph only stores the cell's node record. The value itself lives in
//! the handle, shared between clones, so reading a cell never borrows the
//! graph for longer than the link.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::{Runtime, RuntimeInner};
use crate::graph::{Node, NodeId};

type EqFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_cell(0);
///
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Cell<T> {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    value: Rc<RefCell<T>>,
    eq: EqFn<T>,
}

impl Runtime {
    /// Create a cell compared with `PartialEq`.
    ///
    /// The cell is owned by the current scope, if any, and its graph node is
    /// released when that scope is disposed.
    pub fn create_cell<T>(&self, value: T) -> Cell<T>
    where
        T: PartialEq + 'static,
    {
        self.create_cell_with(value, T::eq)
    }

    /// Create a cell with a custom equality function. Writes of a value
    /// `eq` considers equal to the current one are ignored.
    pub fn create_cell_with<T>(&self, value: T, eq: impl Fn(&T, &T) -> bool + 'static) -> Cell<T>
    where
        T: 'static,
    {
        let owner = self.current_owner();
        let id = {
            let mut graph = self.inner.graph.borrow_mut();
            let parent = owner.filter(|idx| graph.nodes.contains(*idx));
            graph.insert(parent, Node::source)
        };
        trace!(node = %id, "created cell");
        Cell {
            runtime: self.downgrade(),
            id,
            value: Rc::new(RefCell::new(value)),
            eq: Rc::new(eq),
        }
    }

    /// Queue the direct subscribers of a written source.
    fn notify(&self, id: NodeId) {
        self.batch(|| {
            let mut graph = self.inner.graph.borrow_mut();
            let Ok(idx) = graph.lookup(id) else {
                return;
            };
            let graph = &mut *graph;
            graph.heap.clear_fallback(&mut graph.nodes);
            graph.push_subscribers(idx);
        });
    }
}

impl<T: 'static> Cell<T> {
    /// The cell's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn track(&self) {
        if let Ok(runtime) = Runtime::upgrade(&self.runtime) {
            runtime.track(self.id);
        }
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.value.borrow())
    }

    /// Set a new value.
    ///
    /// Does nothing if the new value equals the current one. Otherwise
    /// stores it and queues every direct subscriber; the flush happens when
    /// the outermost batch closes.
    pub fn set(&self, value: T) {
        if (self.eq)(&self.value.borrow(), &value) {
            return;
        }
        let previous = mem::replace(&mut *self.value.borrow_mut(), value);
        drop(previous);

        if let Ok(runtime) = Runtime::upgrade(&self.runtime) {
            trace!(node = %self.id, "cell written");
            runtime.notify(self.id);
        }
    }

    /// Compute the next value from the current one and set it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.value.borrow());
        self.set(next);
    }

    /// Number of derivations currently reading this cell.
    pub fn subscriber_count(&self) -> usize {
        Runtime::upgrade(&self.runtime)
            .map(|runtime| runtime.subscriber_count(self.id))
            .unwrap_or(0)
    }

    /// Release the cell's graph node. Subscribers lose their edge to it; the
    /// value stays readable through remaining handles but writes no longer
    /// propagate.
    pub fn dispose(&self) {
        if let Ok(runtime) = Runtime::upgrade(&self.runtime) {
            runtime.dispose(self.id);
        }
    }

    /// Whether the cell's graph node has been released.
    pub fn is_disposed(&self) -> bool {
        Runtime::upgrade(&self.runtime)
            .map(|runtime| runtime.inspect(self.id, |_| ()).is_err())
            .unwrap_or(true)
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            value: self.value.clone(),
            eq: self.eq.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("value", &self.value.borrow())
            .finish()
    }
}
