//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when one of its
//! dependencies actually changed.
//!
//! # How Memos Work
//!
//! 1. Creating a memo does not run it. The first read computes and caches
//!    the value and records the dependencies it read.
//!
//! 2. When a dependency changes, the memo is queued at its height. If
//!    something subscribes to it, the next stabilization recomputes it
//!    before any of its subscribers.
//!
//! 3. If the recomputed value equals the cached one, the memo's
//!    subscribers are not queued at all, so propagation stops here.
//!
//! 4. A memo nobody subscribes to is left dirty by stabilization. The next
//!    read recomputes it on the spot.
//!
//! # Why This Matters
//!
//! - A cell changes
//! - 10 memos depend on it
//! - Only the memos something observes, or that are actually read,
//!   recompute
//!
//! # Failure
//!
//! A compute function that panics leaves the previously cached value in
//! place and the memo dirty. The panic propagates to whatever triggered the
//! recomputation.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::{Runtime, RuntimeInner};
use crate::error::{Error, Result};
use crate::graph::{Node, NodeFlags, NodeId, UpdateFn};

/// Observable scheduling state of a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up to date.
    Clean,

    /// The cached value may be stale; the next read recomputes it.
    Dirty,

    /// Queued for the next stabilization pass.
    Scheduled,

    /// The memo's node has been released.
    Disposed,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let ((), _scope) = rt.create_scope(|| {
///     let count = rt.create_cell(2);
///     let doubled = rt
///         .create_memo({
///             let count = count.clone();
///             move || count.get() * 2
///         })
///         .unwrap();
///
///     assert_eq!(doubled.get(), 4);
///     count.set(5);
///     assert_eq!(doubled.get(), 10);
/// });
/// ```
pub struct Memo<T> {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    value: Rc<RefCell<Option<T>>>,
}

impl Runtime {
    /// Create a memo compared with `PartialEq`.
    ///
    /// Must be called inside a scope; the memo is disposed with it.
    pub fn create_memo<T>(&self, compute: impl Fn() -> T + 'static) -> Result<Memo<T>>
    where
        T: PartialEq + 'static,
    {
        self.create_memo_with(compute, T::eq)
    }

    /// Create a memo with a custom equality function. A recomputation that
    /// yields a value `eq` considers equal to the cached one does not
    /// propagate.
    pub fn create_memo_with<T>(
        &self,
        compute: impl Fn() -> T + 'static,
        eq: impl Fn(&T, &T) -> bool + 'static,
    ) -> Result<Memo<T>>
    where
        T: 'static,
    {
        let owner = self.owner_for("create_memo")?;
        let value = Rc::new(RefCell::new(None));

        let update: UpdateFn = {
            let value = value.clone();
            Rc::new(move || {
                let next = compute();
                let mut slot = value.borrow_mut();
                if slot.as_ref().is_some_and(|prev| eq(prev, &next)) {
                    return false;
                }
                let previous = slot.replace(next);
                drop(slot);
                drop(previous);
                true
            })
        };

        let id = self
            .inner
            .graph
            .borrow_mut()
            .insert(Some(owner), |id| Node::derived(id, update, false));
        trace!(node = %id, "created memo");

        Ok(Memo {
            runtime: self.downgrade(),
            id,
            value,
        })
    }
}

impl<T: 'static> Memo<T> {
    /// The memo's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn runtime(&self) -> Result<Runtime> {
        Runtime::upgrade(&self.runtime)
    }

    /// Bring the memo up to date, then borrow its value. Tracks the read.
    ///
    /// `f` runs inside the read's batch, so writes it makes flush only
    /// after the borrow is released.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let runtime = self.runtime()?;
        runtime.batch(|| {
            runtime.read_derived(self.id)?;
            let value = self.value.borrow();
            match value.as_ref() {
                Some(value) => Ok(f(value)),
                // Only reachable from inside the memo's own first computation.
                None => Err(Error::Cycle(self.id)),
            }
        })
    }

    /// Get the current value, recomputing first if necessary.
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Get the current value, recomputing first if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the memo was disposed, its runtime dropped, or it is read
    /// from inside its own computation. See [`Memo::try_get`].
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Like [`Memo::get`], without tracking the read.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        match self.runtime() {
            Ok(runtime) => runtime.untracked(|| self.get()),
            Err(err) => panic!("{err}"),
        }
    }

    /// Borrow the current value, recomputing first if necessary.
    ///
    /// # Panics
    ///
    /// Under the same conditions as [`Memo::get`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn state(&self) -> MemoState {
        let Ok(runtime) = self.runtime() else {
            return MemoState::Disposed;
        };
        runtime
            .inspect(self.id, |node| {
                if node.flags.contains(NodeFlags::IN_HEAP) {
                    MemoState::Scheduled
                } else if node.is_dirty() {
                    MemoState::Dirty
                } else {
                    MemoState::Clean
                }
            })
            .unwrap_or(MemoState::Disposed)
    }

    /// Topological height in the graph.
    pub fn height(&self) -> Result<usize> {
        self.runtime()?.inspect(self.id, |node| node.height)
    }

    /// How many times the compute function has completed.
    pub fn run_count(&self) -> Result<u64> {
        self.runtime()?
            .inspect(self.id, |node| node.derivation.as_ref().map_or(0, |d| d.runs))
    }

    /// Number of derivations currently subscribed to this memo.
    pub fn subscriber_count(&self) -> usize {
        self.runtime()
            .map(|runtime| runtime.subscriber_count(self.id))
            .unwrap_or(0)
    }

    /// Dispose the memo and everything it owns. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if let Ok(runtime) = self.runtime() {
            runtime.dispose(self.id);
        }
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            value: self.value.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id)
            .field("value", &self.value.try_borrow().ok())
            .finish()
    }
}
