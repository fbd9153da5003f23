//! Live Node Graph
//!
//! The compiled form of a script: a graph of nodes bound to a scope,
//! kept live by store subscriptions. The `Engine` owns every node and
//! drives the attach, recompute and detach lifecycle.
//!
//! # Concepts
//!
//! ## Nodes
//!
//! Each expression fragment compiles to one node: literals, scope
//! variables, named calls and block templates. A node caches its last
//! result; parents read child caches instead of re-walking syntax.
//!
//! ## Recompute
//!
//! Variable nodes subscribe to the scope's variable store. A change
//! schedules the node in the running propagation; recomputes push fresh
//! values up the parent chain and into the root's output sink.
//!
//! ## Blocks
//!
//! A block node is a template. Callers instantiate it through the yield
//! protocol: `block_yield` creates or rebinds the instance for a key,
//! `block_unyield` retires it. One template serves many concurrent
//! instances, which is how a live filter runs one predicate block per
//! source element.

mod node;
mod engine;
mod eval;
mod block;

pub use engine::{CompileError, Engine, ScriptHandle, WeakEngine};
pub use node::{NodeId, OutputSink, Yielder};
