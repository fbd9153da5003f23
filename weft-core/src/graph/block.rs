//! Block Instantiation
//!
//! The yield protocol: one block template serving many concurrent
//! logical invocations, keyed by an optional index.
//!
//! # How It Works
//!
//! 1. `block_yield` with a fresh key builds an instance: a child scope
//!    with the parameters bound, and the body compiled as one root whose
//!    sink reports through the instance's yielder, tagged with its key.
//!    The caller gets one delivery immediately, even when the body
//!    produced nothing, and further deliveries whenever the body's free
//!    variables change.
//!
//! 2. Yielding an existing key rebinds: new parameter values stack on
//!    top before the old bindings unwind, so the visible value moves in
//!    one notification and never passes through an inherited value.
//!
//! 3. A yield whose origin says the caller's index shifted re-keys the
//!    live instance first. The instance, its scope and its compiled body
//!    survive the move; only the key cell and the index binding change.
//!
//! 4. `block_unyield` retires the instance: body nodes detach, the
//!    child scope unlinks, inherited variables retract.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{trace, warn};

use super::engine::Engine;
use super::node::{BlockInstance, InstanceShared, NodeKind, NodeId, OutputSink, Yielder};
use crate::script::{Ast, Scope};
use crate::store::{Origin, Propagation};
use crate::value::Value;

impl Engine {
    /// Activate (or rebind) the block instance for `key`. The yielder
    /// receives the body's value now and after every change, tagged with
    /// the instance's current key.
    pub fn block_yield(
        &self,
        template: NodeId,
        args: &[Value],
        key: Option<usize>,
        origin: Origin,
        yielder: Yielder,
        propagation: &mut Propagation,
    ) {
        let node = match self.node(template) {
            Some(node) => node,
            None => return,
        };
        let data = match &node.kind {
            NodeKind::Block(data) => data,
            _ => {
                warn!(template = template.0, "yield on a non-block node");
                return;
            }
        };

        // A shifted caller re-keys the live instance instead of
        // rebuilding it, preserving its internal state.
        if let Origin::Moved(from) = origin {
            if key != Some(from) {
                let moved = data.instances.borrow_mut().remove(&Some(from));
                if let Some(instance) = moved {
                    trace!(template = template.0, from, ?key, "block instance re-keyed");
                    instance.shared.key.set(key);
                    data.instances.borrow_mut().insert(key, instance);
                }
            }
        }

        let existing = data.instances.borrow().get(&key).map(|instance| {
            (instance.scope.clone(), instance.shared.clone(), instance.roots.clone())
        });
        if let Some((scope, shared, roots)) = existing {
            *shared.yielder.borrow_mut() = yielder.clone();
            rebind(&scope, &data.params, &shared, args, propagation);
            let current = roots
                .last()
                .and_then(|root| self.node(*root))
                .and_then(|root| root.current());
            yielder(current.as_ref(), key, propagation);
            return;
        }

        trace!(template = template.0, ?key, "block instance created");
        let scope = node.scope.child();
        let shared = Rc::new(InstanceShared {
            key: Cell::new(key),
            yielder: RefCell::new(yielder.clone()),
            bound: RefCell::new(Vec::new()),
        });
        let mut bound = Vec::with_capacity(data.params.len());
        for (index, param) in data.params.iter().enumerate() {
            let value = args.get(index).cloned().unwrap_or(Value::Null);
            scope
                .variables()
                .set_in(param, value.clone(), None, false, propagation);
            bound.push(value);
        }
        *shared.bound.borrow_mut() = bound;

        // The body is one root: a multi-expression body sequences and
        // yields its last expression's value.
        let body = match data.body.len() {
            0 => None,
            1 => Some(data.body[0].clone()),
            _ => Some(Ast::call(",", data.body.clone())),
        };
        let sink: OutputSink = {
            let shared = shared.clone();
            Rc::new(move |value, propagation| {
                let deliver = shared.yielder.borrow().clone();
                deliver(value, shared.key.get(), propagation);
            })
        };
        let mut roots = Vec::new();
        if let Some(body) = body {
            match self.compile_node(&body, &scope, None, Some(sink), propagation) {
                Ok(root) => roots.push(root),
                Err(error) => warn!(template = template.0, %error, "block body failed to compile"),
            }
        }
        let current = roots
            .last()
            .and_then(|root| self.node(*root))
            .and_then(|root| root.current());
        data.instances
            .borrow_mut()
            .insert(key, BlockInstance { scope, roots, shared });
        // Initial delivery, even when the body produced nothing.
        yielder(current.as_ref(), key, propagation);
    }

    /// Deactivate the instance for `key`: detach its body, unlink its
    /// scope. Unknown keys are a no-op.
    pub fn block_unyield(&self, template: NodeId, key: Option<usize>, propagation: &mut Propagation) {
        let node = match self.node(template) {
            Some(node) => node,
            None => return,
        };
        if let NodeKind::Block(data) = &node.kind {
            let instance = data.instances.borrow_mut().remove(&key);
            if let Some(instance) = instance {
                trace!(template = template.0, ?key, "block instance retired");
                self.retire_instance(instance, propagation);
            }
        }
    }
}

/// Swap parameter bindings: the new value stacks on top, then the old
/// layer leaves silently from underneath.
fn rebind(
    scope: &Scope,
    params: &[Rc<str>],
    shared: &InstanceShared,
    args: &[Value],
    propagation: &mut Propagation,
) {
    let mut bound = shared.bound.borrow_mut();
    for (index, param) in params.iter().enumerate() {
        let fresh = args.get(index).cloned().unwrap_or(Value::Null);
        let previous = bound.get(index).cloned();
        if previous.as_ref() == Some(&fresh) {
            continue;
        }
        scope
            .variables()
            .set_in(param, fresh.clone(), None, false, propagation);
        if let Some(previous) = previous {
            scope.variables().unset_in(param, Some(previous), None, propagation);
        }
        if index < bound.len() {
            bound[index] = fresh;
        } else {
            bound.push(fresh);
        }
    }
}
