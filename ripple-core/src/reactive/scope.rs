//! Scopes and Ownership
//!
//! Every memo and effect is owned by the scope or derivation that was
//! current when it was created, and cells are owned the same way when a
//! scope is active. Owners form a tree; disposing a node disposes its
//! subtree depth-first, children before their owner, and then runs the
//! collected cleanups in registration order.
//!
//! Derivations are owners too: before each recomputation, whatever the
//! previous run created is disposed and its cleanups run.

use std::fmt;
use std::rc::Weak;

use tracing::trace;

use super::context::Frame;
use super::runtime::{Runtime, RuntimeInner};
use crate::error::Result;
use crate::graph::{Node, NodeId};

/// An owner for grouped disposal.
///
/// Dropping a `Scope` handle does not dispose it; call [`Scope::dispose`].
#[derive(Clone)]
pub struct Scope {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
}

impl Runtime {
    /// Run `f` with a new scope as owner.
    ///
    /// The scope is a child of the current owner, if any, so it is disposed
    /// along with it. Only the owner changes; reads inside `f` are tracked
    /// by whatever observer is current.
    pub fn create_scope<R>(&self, f: impl FnOnce() -> R) -> (R, Scope) {
        let id = {
            let mut graph = self.inner.graph.borrow_mut();
            let parent = self.current_owner().filter(|idx| graph.nodes.contains(*idx));
            graph.insert(parent, Node::scope)
        };
        trace!(node = %id, "created scope");

        let result = {
            let _ctx = self.inner.context.enter(Frame {
                observer: self.inner.context.observer(),
                owner: Some(id.index()),
            });
            f()
        };

        let scope = Scope {
            runtime: self.downgrade(),
            id,
        };
        (result, scope)
    }

    /// Register `f` to run when the current owner is disposed or, for a
    /// derivation, before its next recomputation.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) -> Result<()> {
        let owner = self.owner_for("on_cleanup")?;
        self.inner.graph.borrow_mut().nodes[owner].cleanups.push(Box::new(f));
        Ok(())
    }
}

impl Scope {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Run `f` with this scope as owner, untracked.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        Runtime::upgrade(&self.runtime)?.with_owner(self.id, f)
    }

    /// Dispose the scope and everything it owns. Disposing twice is a
    /// no-op.
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

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
