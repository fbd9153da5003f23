//! Observable Stores
//!
//! This module implements the observable state layer: key-value stores that
//! notify subscribers on change, an index-addressed ordered store, and live
//! derived views over it.
//!
//! # Concepts
//!
//! ## Stores
//!
//! A `Store` maps string keys to values and notifies per-key and store-wide
//! subscribers when a visible value changes. Three strategies share the one
//! observable core: plain (last write wins), stacked (writes layer and
//! unwind, the top layer is visible) and grouped (every write accumulates
//! into a collection).
//!
//! ## Ordered stores
//!
//! A `Seq` addresses elements by index and notifies subscribers with the
//! index and a provenance tag, so consumers can tell a fresh insertion from
//! an in-place replacement or a shift caused by a splice elsewhere.
//!
//! ## Propagation
//!
//! Every change settles synchronously inside one `Propagation`: a memo of
//! already-notified (store, key) pairs that bounds re-entrant notification,
//! plus a rank-ordered queue that recomputes affected graph nodes children
//! first.
//!
//! # Implementation Notes
//!
//! Stores are `Rc<RefCell<...>>` handles; cloning a handle aliases the same
//! state. Nothing here is `Send`: the engine is single-threaded and
//! re-entrant, and all callbacks run on the caller's stack.

mod propagation;
mod observable;
mod ordered;
mod derived;

pub use propagation::{Dirty, Propagation};
pub use observable::{KeySubscriber, Store, StoreSubscriber, WriterId};
pub use ordered::{IndexSubscriber, Origin, Seq};
pub use derived::{Comparator, FlagSink, LiveFilter, LiveFlag, LiveMap, LiveSort, Mapper, Predicate};
