//! Selector Index
//!
//! A selector answers "is this key the selected one?" for many keys at once
//! while keeping updates O(1): when the selection moves from one key to
//! another, only consumers of those two keys re-run, however many keys are
//! being watched.
//!
//! # How It Works
//!
//! Each watched key gets its own boolean cell. A tracker half edge reads
//! the selection source; when it changes, the tracker sets the previously
//! selected key's cell to `false` and the new key's cell to `true`.
//! Triggering the tracker never wakes a consumer by itself; it only brings
//! the flags up to date before the consumer looks at its cell.
//!
//! Consumers are counted per key. When a consumer is disposed, or
//! recomputes, its count is released; an entry whose count reaches zero is
//! evicted by a deferred task, so an entry that is released and re-acquired
//! within one flush survives.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::debug;

use super::cell::Cell;
use super::half_edge::HalfEdge;
use super::runtime::{Runtime, RuntimeInner};
use super::scope::Scope;
use crate::error::Result;

struct SelectorEntry {
    flag: Cell<bool>,
    consumers: usize,
}

struct SelectorState<K> {
    current: RefCell<Option<K>>,
    entries: RefCell<IndexMap<K, SelectorEntry>>,
}

/// Keyed membership test against a reactive selection.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let ((), scope) = rt.create_scope(|| {
///     let selected = rt.create_cell(1);
///     let selector = rt
///         .create_selector({
///             let selected = selected.clone();
///             move || selected.get()
///         })
///         .unwrap();
///
///     assert!(selector.is_selected(&1));
///     assert!(!selector.is_selected(&2));
///     selected.set(2);
///     assert!(selector.is_selected(&2));
/// });
/// scope.dispose();
/// ```
pub struct Selector<K> {
    runtime: Weak<RuntimeInner>,
    state: Rc<SelectorState<K>>,
    tracker: HalfEdge,
    scope: Scope,
}

impl Runtime {
    /// Create a selector over `source`. Must be called inside a scope.
    pub fn create_selector<K>(&self, source: impl Fn() -> K + 'static) -> Result<Selector<K>>
    where
        K: Hash + Eq + Clone + 'static,
    {
        self.owner_for("create_selector")?;
        let state = Rc::new(SelectorState {
            current: RefCell::new(None),
            entries: RefCell::new(IndexMap::new()),
        });

        let (tracker, scope) = self.create_scope(|| {
            let state = state.clone();
            self.create_half_edge(move || state.select(source()))
        });
        let tracker = match tracker {
            Ok(tracker) => tracker,
            Err(err) => {
                scope.dispose();
                return Err(err);
            }
        };

        Ok(Selector {
            runtime: self.downgrade(),
            state,
            tracker,
            scope,
        })
    }
}

impl<K: Hash + Eq + Clone + 'static> SelectorState<K> {
    /// Move the selection to `next`, flipping at most two flags.
    fn select(&self, next: K) {
        let previous = self.current.replace(Some(next.clone()));
        if previous.as_ref() == Some(&next) {
            return;
        }
        let (off, on) = {
            let entries = self.entries.borrow();
            let off = previous
                .as_ref()
                .and_then(|key| entries.get(key))
                .map(|entry| entry.flag.clone());
            let on = entries.get(&next).map(|entry| entry.flag.clone());
            (off, on)
        };
        if let Some(flag) = off {
            flag.set(false);
        }
        if let Some(flag) = on {
            flag.set(true);
        }
    }

    fn is_current(&self, key: &K) -> bool {
        self.current.borrow().as_ref() == Some(key)
    }

    /// Drop one consumer of `key`, scheduling eviction at zero.
    fn release(this: &Weak<Self>, runtime: &Weak<RuntimeInner>, key: K) {
        let Some(state) = this.upgrade() else {
            return;
        };
        let idle = {
            let mut entries = state.entries.borrow_mut();
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.consumers = entry.consumers.saturating_sub(1);
                    entry.consumers == 0
                }
                None => false,
            }
        };
        if !idle {
            return;
        }
        if let Ok(runtime) = Runtime::upgrade(runtime) {
            let this = this.clone();
            runtime.defer(move || Self::evict(&this, &key));
        }
    }

    fn evict(this: &Weak<Self>, key: &K) {
        let Some(state) = this.upgrade() else {
            return;
        };
        let removed = {
            let mut entries = state.entries.borrow_mut();
            match entries.get(key) {
                Some(entry) if entry.consumers == 0 => entries.shift_remove(key),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            debug!(node = %entry.flag.id(), "evicted selector entry");
            entry.flag.dispose();
        }
    }
}

impl<K: Hash + Eq + Clone + 'static> Selector<K> {
    /// Whether `key` is the current selection.
    ///
    /// Inside a scope the read is tracked through the key's own flag, so the
    /// caller only re-runs when this key's membership flips.
    pub fn try_is_selected(&self, key: &K) -> Result<bool> {
        let runtime = Runtime::upgrade(&self.runtime)?;
        if runtime.owner_for("is_selected").is_err() {
            runtime.untracked(|| self.tracker.try_trigger())?;
            return Ok(self.state.is_current(key));
        }
        self.tracker.try_trigger()?;

        let existing = {
            let mut entries = self.state.entries.borrow_mut();
            entries.get_mut(key).map(|entry| {
                entry.consumers += 1;
                entry.flag.clone()
            })
        };
        let flag = match existing {
            Some(flag) => flag,
            None => {
                let selected = self.state.is_current(key);
                let flag = self.scope.run(|| runtime.create_cell(selected))?;
                self.state.entries.borrow_mut().insert(
                    key.clone(),
                    SelectorEntry {
                        flag: flag.clone(),
                        consumers: 1,
                    },
                );
                flag
            }
        };

        let state = Rc::downgrade(&self.state);
        let weak = runtime.downgrade();
        let key = key.clone();
        runtime.on_cleanup(move || SelectorState::release(&state, &weak, key))?;

        Ok(flag.get())
    }

    /// Whether `key` is the current selection.
    ///
    /// # Panics
    ///
    /// Panics if the selector was disposed or its runtime dropped.
    pub fn is_selected(&self, key: &K) -> bool {
        self.try_is_selected(key).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Keys that currently have an entry, in insertion order.
    pub fn tracked_keys(&self) -> Vec<K> {
        self.state.entries.borrow().keys().cloned().collect()
    }

    /// Consumers currently counted for `key`.
    pub fn consumer_count(&self, key: &K) -> usize {
        self.state
            .entries
            .borrow()
            .get(key)
            .map_or(0, |entry| entry.consumers)
    }

    /// Dispose the tracker and every entry's flag.
    pub fn dispose(&self) {
        self.scope.dispose();
        self.state.entries.borrow_mut().clear();
    }
}

impl<K> Clone for Selector<K> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            state: self.state.clone(),
            tracker: self.tracker.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for Selector<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("current", &self.state.current.try_borrow().ok())
            .field("entries", &self.state.entries.try_borrow().map(|e| e.len()).ok())
            .finish()
    }
}
