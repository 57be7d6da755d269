//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! which owner receives newly created nodes and cleanups. This enables
//! automatic dependency tracking: when a cell or memo is read, the current
//! observer is linked to it.
//!
//! # Implementation
//!
//! Each runtime owns a stack of frames. Running a derivation pushes a frame
//! with the derivation as both observer and owner; `untracked` pushes a frame
//! with no observer; a scope pushes a frame with itself as owner. Frames are
//! popped by a guard, so the previous context is restored even if the
//! computation panics.
//!
//! The stack lives in the runtime rather than in a thread-local, so
//! independent runtimes never observe each other's context.

use std::cell::RefCell;

/// One entry of the context stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Slot of the derivation whose reads are being tracked.
    pub observer: Option<usize>,
    /// Slot of the node that owns anything created in this frame.
    pub owner: Option<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: RefCell<Vec<Frame>>,
}

impl ContextStack {
    /// The active frame, or the empty root frame.
    pub fn current(&self) -> Frame {
        self.frames.borrow().last().copied().unwrap_or_default()
    }

    pub fn observer(&self) -> Option<usize> {
        self.current().observer
    }

    pub fn owner(&self) -> Option<usize> {
        self.current().owner
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Enter a frame. It is exited when the returned guard is dropped.
    pub fn enter(&self, frame: Frame) -> ContextGuard<'_> {
        self.frames.borrow_mut().push(frame);
        ContextGuard { stack: self, frame }
    }
}

/// Guard that pops its frame when dropped.
pub(crate) struct ContextGuard<'a> {
    stack: &'a ContextStack,
    frame: Frame,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = self.stack.frames.borrow_mut().pop();

        // Frames are strictly nested; a mismatch means a guard escaped.
        debug_assert_eq!(
            popped,
            Some(self.frame),
            "context frame mismatch: expected {:?}, got {:?}",
            self.frame,
            popped
        );
    }
}
