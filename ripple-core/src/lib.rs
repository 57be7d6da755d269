//! Ripple Core
//!
//! This crate provides a fine-grained incremental computation engine. It
//! implements:
//!
//! - Reactive primitives (cells, memos, effects, half edges)
//! - Height-ordered, glitch-free propagation with lazy pull for reads that
//!   race ahead of it
//! - Scope-based ownership and disposal
//! - A selector index for O(1) keyed membership updates
//!
//! # Architecture
//!
//! The crate is organized into two layers:
//!
//! - `graph`: node and edge arenas, heights and the dirty scheduler
//! - `reactive`: the runtime, typed handles, batches, scopes and selectors
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use ripple_core::Runtime;
//!
//! let rt = Runtime::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let ((), scope) = rt.create_scope(|| {
//!     // Create a cell
//!     let count = rt.create_cell(0);
//!
//!     // Create a derived value
//!     let doubled = rt
//!         .create_memo({
//!             let count = count.clone();
//!             move || count.get() * 2
//!         })
//!         .unwrap();
//!
//!     // Create an effect
//!     let log = log.clone();
//!     rt.create_effect(move || log.borrow_mut().push(doubled.get()))
//!         .unwrap();
//!
//!     // Update the cell; the effect runs again
//!     count.set(5);
//! });
//!
//! assert_eq!(*log.borrow(), vec![0, 10]);
//! scope.dispose();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use graph::{GraphStats, NodeId, NodeKind};
pub use reactive::{Cell, Effect, HalfEdge, Memo, MemoState, Runtime, Scope, Selector};
