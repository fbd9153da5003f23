//! Graph Nodes
//!
//! One node per live expression: a literal, a scope variable reference,
//! a named call over operand slots, or a block template. Nodes cache
//! their latest result; parents read child caches instead of
//! re-evaluating subtrees.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::script::{Ast, Scope};
use crate::store::{IndexSubscriber, KeySubscriber, Propagation, Seq, Store, StoreSubscriber};
use crate::value::Value;

/// Identity of a node within its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u64);

/// Receives a root node's result: on attach, and after every recompute
/// that changed it.
pub type OutputSink = Rc<dyn Fn(Option<&Value>, &mut Propagation)>;

/// Receives a block instance's result, tagged with the instance key.
pub type Yielder = Rc<dyn Fn(Option<&Value>, Option<usize>, &mut Propagation)>;

/// One argument slot of a call node.
#[derive(Clone)]
pub(crate) enum Operand {
    /// A literal baked in at compile time; no node needed.
    Literal(Value),
    /// The raw name of an assignment target. Never evaluated.
    Raw(Rc<str>),
    /// A compiled child node.
    Child(NodeId),
    /// Not yet compiled. Translation happens on first evaluation, so
    /// untaken branches never subscribe.
    Pending(Rc<Ast>),
}

/// A block template: parameters and body kept as syntax, instantiated
/// per yield key with a fresh child scope.
pub(crate) struct BlockData {
    pub(crate) params: Vec<Rc<str>>,
    pub(crate) body: Vec<Rc<Ast>>,
    pub(crate) instances: RefCell<HashMap<Option<usize>, BlockInstance>>,
}

/// State shared between a block instance and the sink closures compiled
/// into its body, so re-keying moves the live instance instead of
/// rebuilding it.
pub(crate) struct InstanceShared {
    pub(crate) key: Cell<Option<usize>>,
    pub(crate) yielder: RefCell<Yielder>,
    /// Current parameter bindings, kept so a rebind can retract exactly
    /// the layers it stacked.
    pub(crate) bound: RefCell<Vec<Value>>,
}

pub(crate) struct BlockInstance {
    pub(crate) scope: Scope,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) shared: Rc<InstanceShared>,
}

pub(crate) enum NodeKind {
    Literal(Value),
    Variable { path: Rc<str> },
    Call { name: Rc<str>, operands: RefCell<Vec<Operand>> },
    Block(BlockData),
}

/// A store-backed write this node performed, kept so detach can undo it.
pub(crate) enum ExecutedWrite {
    Set { path: Rc<str>, value: Value },
    Removed { path: Rc<str>, prior: Option<Value> },
}

/// A collection this node re-executes over when its contents change.
pub(crate) enum CollectionWatch {
    Seq(Seq, IndexSubscriber),
    Store(Store, StoreSubscriber),
}

pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    /// Height in the expression tree; the propagation queue drains low
    /// ranks first, so children settle before parents read them.
    pub(crate) rank: u32,
    pub(crate) scope: Scope,
    /// Non-owning link to the call consuming this node's value. Every
    /// operand slot compiles its own node, so a node has at most one
    /// consumer; shared syntax is shared pre-compilation, as `Rc<Ast>`.
    pub(crate) parent: Cell<Option<NodeId>>,
    pub(crate) value: RefCell<Option<Value>>,
    pub(crate) sink: RefCell<Option<OutputSink>>,
    /// Live subscription a variable node holds on its scope.
    pub(crate) watcher: RefCell<Option<KeySubscriber>>,
    pub(crate) collection_watch: RefCell<Vec<CollectionWatch>>,
    /// Re-entrancy guard; a node never evaluates inside itself.
    pub(crate) running: Cell<bool>,
    pub(crate) executed: RefCell<Option<ExecutedWrite>>,
    /// Last branch a conditional took; yields happen on edges only.
    pub(crate) condition_state: Cell<Option<bool>>,
    /// Registry key of the live view this node constructed, if any.
    pub(crate) view: Cell<Option<u64>>,
}

impl Node {
    pub(crate) fn current(&self) -> Option<Value> {
        self.value.borrow().clone()
    }
}
