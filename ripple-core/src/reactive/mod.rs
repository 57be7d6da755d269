//! Reactive Primitives
//!
//! This module implements the reactive layer on top of the dependency
//! graph: cells, memos, effects, half edges, scopes and selectors, plus the
//! runtime that schedules them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. When a cell is read while a
//! memo or effect is running, that computation is linked to it. When the
//! cell is written, its direct subscribers are queued.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes, and only if something observes it
//! or reads it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems.
//!
//! ## Half Edges
//!
//! A half edge is a derivation with no value. Triggering it subscribes the
//! caller so the half edge's own side effects stay current, without the
//! caller ever being woken by it.
//!
//! ## Scopes
//!
//! Everything created while a scope (or a running memo or effect) is
//! current is owned by it and disposed with it.
//!
//! # Implementation Notes
//!
//! Each [`Runtime`] owns its tracking context, so independent runtimes can
//! coexist on one thread. Handles hold a weak reference to their runtime
//! and are `!Send`.

mod batch;
mod cell;
mod context;
mod effect;
mod half_edge;
mod memo;
mod runtime;
mod scope;
mod selector;

pub use cell::Cell;
pub use effect::Effect;
pub use half_edge::HalfEdge;
pub use memo::{Memo, MemoState};
pub use runtime::Runtime;
pub use scope::Scope;
pub use selector::Selector;
