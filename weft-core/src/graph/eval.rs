//! Evaluation
//!
//! How a node computes its value, and how a fresh value travels upward.
//!
//! # How It Works
//!
//! 1. A call node walks its operand slots left to right. Syntax operands
//!    compile on first read; compiled ones read the child's cached value.
//!    Short-circuit names (`,`, `&&`, `||`) consult their evaluator per
//!    operand and may stop with a partial result. For everything else a
//!    missing operand value is a soft failure: the call produces nothing
//!    and propagation halts here silently.
//!
//! 2. Settled calls resolve in order: scope methods, engine builtins
//!    (assignment, conditionals, live views), the helper registry, then
//!    a same-named callable on the first argument. Resolution failure is
//!    a soft failure too.
//!
//! 3. A changed result stores into the node, fires the node's sink and
//!    schedules the parent. Scheduling respects rank, so a parent whose
//!    inputs both changed recomputes once, after both settled.

use std::rc::Rc;

use tracing::{trace, warn};

use super::engine::{Engine, View, WeakEngine};
use super::node::{CollectionWatch, ExecutedWrite, Node, NodeId, NodeKind, Operand};
use crate::script::{self, Verdict};
use crate::store::{
    Dirty, IndexSubscriber, Origin, Propagation, StoreSubscriber, WriterId,
};
use crate::value::Value;

/// A node waiting in the propagation queue.
pub(crate) struct DirtyNode {
    pub(crate) engine: WeakEngine,
    pub(crate) node: Rc<Node>,
}

impl Dirty for DirtyNode {
    fn ident(&self) -> u64 {
        self.node.id.0
    }

    fn rank(&self) -> u32 {
        self.node.rank
    }

    fn run(&self, propagation: &mut Propagation) {
        if let Some(engine) = self.engine.upgrade() {
            recompute(&engine, &self.node, propagation, false);
        }
    }
}

/// Schedule `node` for recompute inside the running propagation.
pub(crate) fn schedule(engine: &Engine, node: Rc<Node>, propagation: &mut Propagation) {
    propagation.schedule(Rc::new(DirtyNode { engine: engine.downgrade(), node }));
}

/// Re-evaluate one node and push the result upward if it changed (or
/// unconditionally with `force`).
pub(crate) fn recompute(engine: &Engine, node: &Rc<Node>, propagation: &mut Propagation, force: bool) {
    if node.running.get() {
        return;
    }
    node.running.set(true);
    let result = match &node.kind {
        NodeKind::Literal(value) => Some(value.clone()),
        NodeKind::Variable { path } => node.scope.get(path),
        // A block evaluates to its own handle; bodies run per instance.
        NodeKind::Block(_) => Some(Value::Block(node.id)),
        NodeKind::Call { name, operands } => {
            evaluate_call(engine, node, name.clone(), operands, propagation)
        }
    };
    node.running.set(false);
    deliver(engine, node, result, force, propagation);
}

/// Store a result and propagate it: fire the sink, schedule the parent.
pub(crate) fn deliver(
    engine: &Engine,
    node: &Rc<Node>,
    result: Option<Value>,
    force: bool,
    propagation: &mut Propagation,
) {
    let changed = {
        let mut slot = node.value.borrow_mut();
        let changed = *slot != result;
        *slot = result.clone();
        changed
    };
    if !changed && !force {
        return;
    }
    trace!(id = node.id.0, value = ?result, "node value");
    let sink = node.sink.borrow().clone();
    if let Some(sink) = sink {
        sink(result.as_ref(), propagation);
    }
    if let Some(parent) = node.parent.get() {
        if let Some(parent) = engine.node(parent) {
            // A running parent reads this value itself before finishing.
            if !parent.running.get() {
                schedule(engine, parent, propagation);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Calls
// ----------------------------------------------------------------------------

fn evaluate_call(
    engine: &Engine,
    node: &Rc<Node>,
    name: Rc<str>,
    operands: &std::cell::RefCell<Vec<Operand>>,
    propagation: &mut Propagation,
) -> Option<Value> {
    let evaluator = script::evaluator(&name);
    let total = operands.borrow().len();
    let mut raw_target: Option<Rc<str>> = None;
    let mut args: Vec<Value> = Vec::with_capacity(total);

    for index in 0..total {
        let operand = operands.borrow()[index].clone();
        let value = match operand {
            Operand::Literal(value) => Some(value),
            Operand::Raw(path) => {
                raw_target = Some(path);
                continue;
            }
            Operand::Child(child) => engine.node(child).and_then(|n| n.current()),
            Operand::Pending(ast) => {
                let child = match engine.compile_node(&ast, &node.scope, Some(node.id), None, propagation) {
                    Ok(child) => child,
                    Err(error) => {
                        warn!(name = &*name, %error, "argument failed to compile");
                        return None;
                    }
                };
                operands.borrow_mut()[index] = Operand::Child(child);
                engine.node(child).and_then(|n| n.current())
            }
        };
        if let Some(evaluator) = evaluator {
            match evaluator(value.as_ref(), index + 1 == total) {
                Verdict::Stop(result) => return result,
                Verdict::Continue => {}
            }
        }
        match value {
            Some(value) => args.push(value),
            // Without a short-circuit evaluator every argument is
            // required; an absent one suppresses the call.
            None => {
                if evaluator.is_none() {
                    trace!(name = &*name, index, "argument absent, call suppressed");
                    return None;
                }
            }
        }
    }

    // Scope methods shadow everything.
    if let Some(Value::Native(method)) = node.scope.lookup_method(&name) {
        return method(engine, &args, propagation);
    }

    // Reversible calls record what they did so detach can undo it.
    if script::inverse(&name).is_some() {
        return match &*name {
            "undefine" => undefine(node, raw_target?, propagation),
            _ => assign(node, raw_target?, args.first()?.clone(), propagation),
        };
    }

    match &*name {
        "if" => return conditional(engine, node, &args, false, propagation),
        "unless" => return conditional(engine, node, &args, true, propagation),
        "filter" | "map" | "sort" | "every" | "some" => {
            if let Some(result) = derived_view(engine, node, &name, &args, propagation) {
                return Some(result);
            }
        }
        _ => {}
    }

    let helper = engine.inner.helpers.borrow().get(&*name).cloned();
    if let Some(helper) = helper {
        ensure_collection_watches(engine, node, &args, propagation);
        return helper(engine, &args, propagation);
    }

    // A same-named callable on the first argument.
    if let Some(Value::Store(store)) = args.first() {
        if let Some(Value::Native(method)) = store.get(&name) {
            return method(engine, &args, propagation);
        }
    }

    trace!(name = &*name, "call unresolved");
    None
}

// ----------------------------------------------------------------------------
// Assignment
// ----------------------------------------------------------------------------

fn assign(
    node: &Rc<Node>,
    path: Rc<str>,
    value: Value,
    propagation: &mut Propagation,
) -> Option<Value> {
    let writer = WriterId::raw(node.id.0);
    node.scope
        .variables()
        .write_in(&path, Some(value.clone()), Some(writer), propagation);
    *node.executed.borrow_mut() = Some(ExecutedWrite::Set { path, value: value.clone() });
    Some(value)
}

fn undefine(node: &Rc<Node>, path: Rc<str>, propagation: &mut Propagation) -> Option<Value> {
    let variables = node.scope.variables();
    let prior = variables.get(&path);
    if prior.is_some() {
        variables.unset_in(&path, None, None, propagation);
    }
    *node.executed.borrow_mut() = Some(ExecutedWrite::Removed { path, prior });
    Some(Value::Null)
}

// ----------------------------------------------------------------------------
// Conditionals
// ----------------------------------------------------------------------------

/// `if`/`unless`: yield the chosen branch, unyield the other on a flip.
/// A branch that produces nothing still yields null, never absence.
fn conditional(
    engine: &Engine,
    node: &Rc<Node>,
    args: &[Value],
    invert: bool,
    propagation: &mut Propagation,
) -> Option<Value> {
    let condition = args.first()?;
    let branch = condition.truthy() != invert;
    let previous = node.condition_state.replace(Some(branch));
    let (chosen, other) = if branch {
        (args.get(1), args.get(2))
    } else {
        (args.get(2), args.get(1))
    };
    if previous != Some(branch) {
        if let Some(Value::Block(template)) = other {
            engine.block_unyield(*template, None, propagation);
        }
    }
    match chosen {
        Some(Value::Block(template)) => {
            engine.block_yield(
                *template,
                &[],
                None,
                Origin::Fresh,
                node_yielder(engine, node.id),
                propagation,
            );
            // block_yield delivered through the yielder already.
            Some(node.current().unwrap_or(Value::Null))
        }
        Some(value) => Some(value.clone()),
        None => Some(Value::Null),
    }
}

/// A yielder that lands block results in `node` and propagates them.
fn node_yielder(engine: &Engine, id: NodeId) -> super::node::Yielder {
    let weak = engine.downgrade();
    Rc::new(move |result, _key, propagation| {
        if let Some(engine) = weak.upgrade() {
            if let Some(node) = engine.node(id) {
                let value = result.cloned().unwrap_or(Value::Null);
                deliver(&engine, &node, Some(value), false, propagation);
            }
        }
    })
}

// ----------------------------------------------------------------------------
// Live views
// ----------------------------------------------------------------------------

/// Construct a live derived view for `seq.filter { ... }` and friends.
/// Returns None when the arguments do not fit, letting resolution fall
/// through to scope methods on other receivers.
fn derived_view(
    engine: &Engine,
    node: &Rc<Node>,
    name: &str,
    args: &[Value],
    _propagation: &mut Propagation,
) -> Option<Value> {
    let source = match args.first() {
        Some(Value::Seq(seq)) => seq.clone(),
        _ => return None,
    };
    let template = match args.get(1) {
        Some(Value::Block(template)) => Some(*template),
        _ => None,
    };
    let result = match name {
        "filter" => {
            let view = engine.filter(&source, template?);
            let output = view.output();
            engine.register_view(node, View::Filter(view));
            Value::Seq(output)
        }
        "map" => {
            let view = engine.map(&source, template?);
            let output = view.output();
            engine.register_view(node, View::Map(view));
            Value::Seq(output)
        }
        "sort" => {
            // Sorting takes the default comparator; block comparators
            // do not exist at this layer.
            let view = source.sorted(None);
            let output = view.output();
            engine.register_view(node, View::Sort(view));
            Value::Seq(output)
        }
        "every" | "some" => {
            let sink = flag_sink(engine, node.id);
            let view = if name == "every" {
                engine.every(&source, template?, Some(sink))
            } else {
                engine.some(&source, template?, Some(sink))
            };
            let current = view.current();
            engine.register_view(node, View::Flag(view));
            Value::Bool(current)
        }
        _ => return None,
    };
    Some(result)
}

/// Lands every/some flips back in the constructing node.
fn flag_sink(engine: &Engine, id: NodeId) -> crate::store::FlagSink {
    let weak = engine.downgrade();
    Rc::new(move |value, propagation| {
        if let Some(engine) = weak.upgrade() {
            if let Some(node) = engine.node(id) {
                deliver(&engine, &node, Some(Value::Bool(value)), false, propagation);
            }
        }
    })
}

// ----------------------------------------------------------------------------
// Collection liveness
// ----------------------------------------------------------------------------

/// Helpers over a sequence or store (`count`, `join`, ...) re-execute
/// when the collection's contents change, not just when the handle does.
fn ensure_collection_watches(
    engine: &Engine,
    node: &Rc<Node>,
    args: &[Value],
    propagation: &mut Propagation,
) {
    for arg in args {
        match arg {
            Value::Seq(seq) => {
                let watched = node.collection_watch.borrow().iter().any(|w| match w {
                    CollectionWatch::Seq(existing, _) => existing.addr() == seq.addr(),
                    _ => false,
                });
                if watched {
                    continue;
                }
                let weak = engine.downgrade();
                let id = node.id;
                let watcher: IndexSubscriber = Rc::new(move |_value, _index, _state, _origin, propagation| {
                    if let Some(engine) = weak.upgrade() {
                        if let Some(node) = engine.node(id) {
                            if !node.running.get() {
                                schedule(&engine, node, propagation);
                            }
                        }
                    }
                });
                node.collection_watch
                    .borrow_mut()
                    .push(CollectionWatch::Seq(seq.clone(), watcher.clone()));
                seq.watch_in(watcher, propagation);
            }
            Value::Store(store) => {
                let watched = node.collection_watch.borrow().iter().any(|w| match w {
                    CollectionWatch::Store(existing, _) => existing.addr() == store.addr(),
                    _ => false,
                });
                if watched {
                    continue;
                }
                let weak = engine.downgrade();
                let id = node.id;
                let observer: StoreSubscriber =
                    Rc::new(move |_key, _value, _state, _old, propagation| {
                        if let Some(engine) = weak.upgrade() {
                            if let Some(node) = engine.node(id) {
                                if !node.running.get() {
                                    schedule(&engine, node, propagation);
                                }
                            }
                        }
                    });
                node.collection_watch
                    .borrow_mut()
                    .push(CollectionWatch::Store(store.clone(), observer.clone()));
                store.observe(observer);
            }
            _ => {}
        }
    }
}
