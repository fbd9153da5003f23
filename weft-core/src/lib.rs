//! Weft Core
//!
//! This crate provides the core runtime for the Weft reactive expression
//! engine. It implements:
//!
//! - Observable key-value stores (plain, stacked, grouped, ordered)
//! - A small expression language with a regex-driven parser
//! - A live node graph that recomputes expressions when stores change
//! - Scope chains, helper registries and live derived views
//!
//! Scripts are parsed into syntax trees, compiled into a graph of variable,
//! function and block nodes, and attached to a scope. From then on the graph
//! is live: setting a variable in the scope recomputes exactly the
//! expressions that read it and pushes fresh results to their outputs.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: The dynamic value type scripts and stores traffic in
//! - `store`: Observable stores, change propagation and derived views
//! - `script`: Tokenizer, parser, scopes, helpers and operator tables
//! - `graph`: The compiled node graph and the engine that drives it
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::graph::Engine;
//! use weft_core::script::Scope;
//!
//! let engine = Engine::new();
//! let scope = Scope::new();
//! scope.variables().set("a", 1.0);
//!
//! // Attach a live expression; the sink fires now and on every change.
//! let script = engine
//!     .attach("a + b * 2", &scope, Some(std::rc::Rc::new(|result| {
//!         println!("result: {:?}", result);
//!     })))
//!     .unwrap();
//!
//! scope.variables().set("b", 2.0); // sink receives Some(5)
//! engine.detach(&script);
//! ```

pub mod value;
pub mod store;
pub mod script;
pub mod graph;

pub use value::Value;
