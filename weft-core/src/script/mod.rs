//! Script Language
//!
//! This module implements the expression language: syntax trees, the
//! parser that builds them, the operator and helper tables that give
//! names meaning, and the scope chain that resolves variables.
//!
//! # Concepts
//!
//! ## Syntax
//!
//! Source text parses into lists of `Ast` trees: literals, dotted
//! variable paths, named calls, parameterized blocks and selectors.
//! Operators are ordinary calls after parsing; `2 + 3 * 4` is
//! `+(2, *(3, 4))`.
//!
//! ## Meaning
//!
//! `operators` maps names to precedence, short-circuit evaluators and
//! value-level application. `helpers` is the built-in method table every
//! engine starts from: operator passthroughs, counting and
//! pluralization, string, number and date utilities.
//!
//! ## Scopes
//!
//! A `Scope` pairs a variable store with a method store and an optional
//! parent. Variables merge down the chain through stacked stores, so a
//! child sees parent bindings live and its own writes shadow them.

mod ast;
mod operators;
mod parser;
mod helpers;
mod scope;

pub use ast::{Ast, AstList};
pub use helpers::{default_helpers, Helpers, NativeFn};
pub use operators::{
    apply, evaluator, inverse, is_combinator, literal_argument, precedence, Evaluator, Verdict,
    DEFAULT_PRECEDENCE,
};
pub use parser::{parse, ParseError, Scanner};
pub use scope::Scope;
