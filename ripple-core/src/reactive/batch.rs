//! Batches
//!
//! A batch groups writes so that derived values are brought up to date once,
//! when the outermost batch closes, instead of after every write. Every
//! write runs inside an implicit batch, so a write made at top level flushes
//! immediately while writes inside `batch` wait for its end.
//!
//! The flush is `stabilize` followed by the deferred-task queue.

use std::panic::{self, AssertUnwindSafe};

use super::runtime::Runtime;

impl Runtime {
    /// Run `f` with the flush deferred until the outermost batch closes.
    ///
    /// Nested batches only flush at the outermost boundary. The return value
    /// is `f`'s. If `f` panics, writes it already made stand, the flush
    /// still runs, and the panic is then resumed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ripple_core::Runtime;
    ///
    /// let rt = Runtime::new();
    /// let ((), scope) = rt.create_scope(|| {
    ///     let a = rt.create_cell(1);
    ///     let b = rt.create_cell(2);
    ///     let sum = rt.create_memo({
    ///         let (a, b) = (a.clone(), b.clone());
    ///         move || a.get() + b.get()
    ///     })
    ///     .unwrap();
    ///     rt.create_effect(move || {
    ///         sum.get();
    ///     })
    ///     .unwrap();
    ///
    ///     let before = rt.stats().recomputations;
    ///     rt.batch(|| {
    ///         a.set(10);
    ///         b.set(20);
    ///     });
    ///     // One memo run and one effect run, not two of each.
    ///     assert_eq!(rt.stats().recomputations - before, 2);
    /// });
    /// scope.dispose();
    /// ```
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let depth = &self.inner.batch_depth;
        depth.set(depth.get() + 1);
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        depth.set(depth.get() - 1);
        if depth.get() == 0 {
            self.flush();
        }
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Current batch nesting depth.
    pub fn batch_depth(&self) -> usize {
        self.inner.batch_depth.get()
    }

    /// Flush run when the outermost batch closes.
    ///
    /// # Panics
    ///
    /// Panics if stabilization reports a structural error such as
    /// [`Error::HeightLimit`](crate::Error::HeightLimit); writes have no
    /// error channel of their own.
    fn flush(&self) {
        if self.inner.stabilizing.get() {
            return;
        }
        if let Err(err) = self.stabilize() {
            panic!("reactive flush failed: {err}");
        }
        self.run_deferred();
    }
}
