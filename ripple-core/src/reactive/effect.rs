//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect is queued and runs in the flush of the
//!    creating batch (immediately, when created at top level), establishing
//!    its initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued again at its height
//!    and re-runs in the next stabilization, after every memo it reads.
//!
//! 3. Before re-running, everything the effect created during its last run
//!    is disposed and its cleanups run. Dependencies are re-tracked during
//!    the run; those no longer read are unlinked afterwards.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps
//!   change, whether or not anything observes them).
//! - Nothing can subscribe to an effect.
//!
//! # Cleanup
//!
//! Register cleanups with [`Runtime::on_cleanup`] from inside the effect.
//! They run before the effect re-runs and when it is disposed. This is
//! useful for releasing resources like listeners or timers.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::{Runtime, RuntimeInner};
use crate::error::Result;
use crate::graph::{Node, NodeId, UpdateFn};

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let seen = Rc::new(Cell::new(0));
/// let ((), scope) = rt.create_scope(|| {
///     let count = rt.create_cell(1);
///     let seen = seen.clone();
///     let effect = rt
///         .create_effect({
///             let count = count.clone();
///             move || seen.set(count.get())
///         })
///         .unwrap();
///
///     count.set(5);
///     assert_eq!(effect.run_count().unwrap(), 2);
/// });
/// assert_eq!(seen.get(), 5);
/// scope.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
}

impl Runtime {
    /// Create an effect owned by the current scope.
    ///
    /// The effect is queued immediately and runs when the current batch
    /// flushes.
    pub fn create_effect(&self, run: impl FnMut() + 'static) -> Result<Effect> {
        let owner = self.owner_for("create_effect")?;
        let run = RefCell::new(run);
        let update: UpdateFn = Rc::new(move || {
            (*run.borrow_mut())();
            false
        });

        let id = self.batch(|| {
            let mut graph = self.inner.graph.borrow_mut();
            let id = graph.insert(Some(owner), |id| Node::derived(id, update, true));
            graph.schedule(id.index());
            id
        });
        trace!(node = %id, "created effect");

        Ok(Effect {
            runtime: self.downgrade(),
            id,
        })
    }
}

impl Effect {
    /// The effect's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose of the effect and everything it owns.
    ///
    /// After disposal, the effect will not run again.
    pub fn dispose(&self) {
        if let Ok(runtime) = Runtime::upgrade(&self.runtime) {
            runtime.dispose(self.id);
        }
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        Runtime::upgrade(&self.runtime)
            .and_then(|runtime| runtime.inspect(self.id, |_| ()))
            .is_err()
    }

    /// Get the number of times the effect has run to completion.
    pub fn run_count(&self) -> Result<u64> {
        Runtime::upgrade(&self.runtime)?
            .inspect(self.id, |node| node.derivation.as_ref().map_or(0, |d| d.runs))
    }

    /// Get the number of dependencies observed by the last run.
    pub fn dependency_count(&self) -> usize {
        Runtime::upgrade(&self.runtime)
            .map(|runtime| runtime.dependency_count(self.id))
            .unwrap_or(0)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count().ok())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
