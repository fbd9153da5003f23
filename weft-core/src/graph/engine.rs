//! The Engine
//!
//! An engine owns the node arena, the parse memo, the helper registry
//! and the live views scripts construct. Attaching a script parses it,
//! compiles a node tree bound to a scope, evaluates it once, and leaves
//! the tree live: store changes recompute exactly the nodes that read
//! them.
//!
//! # How It Works
//!
//! 1. `attach` parses (memoized by exact source text), compiles a root
//!    node and evaluates it inside one propagation. Compilation is
//!    shallow: call arguments stay as syntax until first read, so an
//!    untaken branch never subscribes to anything.
//!
//! 2. Variable nodes subscribe to their scope. A change schedules the
//!    node in the propagation queue; recomputes push fresh values up
//!    the parent chain, and the root's sink fires when its value
//!    changed.
//!
//! 3. `detach` unwinds everything attach and evaluation built:
//!    subscriptions, assignment writes, block instances and live views.
//!    Detaching twice is a no-op.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::debug;

use super::eval;
use super::node::{
    BlockData, CollectionWatch, ExecutedWrite, Node, NodeId, NodeKind, Operand, OutputSink,
};
use crate::script::{
    self, default_helpers, Ast, AstList, Helpers, NativeFn, ParseError, Scanner, Scope,
};
use crate::store::{
    FlagSink, KeySubscriber, LiveFilter, LiveFlag, LiveMap, LiveSort, Mapper, Predicate,
    Propagation, Seq, WriterId,
};
use crate::value::Value;

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("selector `{selector}` cannot be compiled")]
    Selector { selector: String },
    #[error("assignment target must be a variable name")]
    AssignTarget,
    #[error("script is empty")]
    Empty,
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// An attached script. Pass it back to `detach` when done.
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    pub(crate) root: NodeId,
}

/// A live derived view kept alive by the engine for the node that
/// constructed it.
pub(crate) enum View {
    Filter(LiveFilter),
    Map(LiveMap),
    Sort(LiveSort),
    Flag(LiveFlag),
}

impl View {
    fn detach(&self) {
        match self {
            View::Filter(view) => view.detach(),
            View::Map(view) => view.detach(),
            View::Sort(view) => view.detach(),
            View::Flag(view) => view.detach(),
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) nodes: RefCell<HashMap<NodeId, Rc<Node>>>,
    next_id: Cell<u64>,
    pub(crate) scanner: Scanner,
    parsed: RefCell<HashMap<String, Rc<AstList>>>,
    pub(crate) helpers: RefCell<Helpers>,
    views: RefCell<HashMap<u64, View>>,
}

/// Handle to a live engine. Cloning aliases the same engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Rc<EngineInner>,
}

/// A non-owning engine handle for callbacks that must not keep the
/// engine alive.
#[derive(Clone)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EngineInner {
                nodes: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
                scanner: Scanner::new(),
                parsed: RefCell::new(HashMap::new()),
                helpers: RefCell::new(default_helpers()),
                views: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine { inner: Rc::downgrade(&self.inner) }
    }

    /// Register (or replace) a named helper.
    pub fn register_helper(&self, name: &str, helper: NativeFn) {
        self.inner.helpers.borrow_mut().insert(name.to_string(), helper);
    }

    /// A live filter over `source` driven by a block template. The
    /// caller owns the view and ends it with `detach`.
    pub fn filter(&self, source: &Seq, template: NodeId) -> LiveFilter {
        LiveFilter::new(source, self.block_predicate(template))
    }

    /// A live map over `source` driven by a block template.
    pub fn map(&self, source: &Seq, template: NodeId) -> LiveMap {
        LiveMap::new(
            source,
            Mapper::Block { engine: self.downgrade(), template },
        )
    }

    /// A live universally-quantified flag over `source`.
    pub fn every(&self, source: &Seq, template: NodeId, sink: Option<FlagSink>) -> LiveFlag {
        LiveFlag::every(source, self.block_predicate(template), sink)
    }

    /// A live existentially-quantified flag over `source`.
    pub fn some(&self, source: &Seq, template: NodeId, sink: Option<FlagSink>) -> LiveFlag {
        LiveFlag::some(source, self.block_predicate(template), sink)
    }

    fn block_predicate(&self, template: NodeId) -> Predicate {
        Predicate::Block { engine: self.downgrade(), template }
    }

    /// Parse source into syntax trees. Results are memoized by the exact
    /// source text, so re-attaching a script skips the tokenizer.
    pub fn parse(&self, source: &str) -> Result<Rc<AstList>, ParseError> {
        if let Some(hit) = self.inner.parsed.borrow().get(source) {
            return Ok(hit.clone());
        }
        let parsed = Rc::new(script::parse(&self.inner.scanner, source)?);
        self.inner
            .parsed
            .borrow_mut()
            .insert(source.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// Attach a script to a scope. The sink receives the result now and
    /// after every change. Multiple comma expressions attach as one
    /// sequence whose result is the last expression.
    pub fn attach(
        &self,
        source: &str,
        scope: &Scope,
        sink: Option<OutputSink>,
    ) -> Result<ScriptHandle, CompileError> {
        let parsed = self.parse(source)?;
        let ast = match parsed.len() {
            0 => return Err(CompileError::Empty),
            1 => parsed[0].clone(),
            _ => Ast::call(",", (*parsed).clone()),
        };
        let handle = self.compile(&ast, scope, sink)?;
        debug!(root = handle.root.0, source, "script attached");
        Ok(handle)
    }

    /// Compile one expression tree against a scope and evaluate it,
    /// leaving it live. The optional sink receives results like
    /// `attach`'s.
    pub fn compile(
        &self,
        ast: &Rc<Ast>,
        scope: &Scope,
        sink: Option<OutputSink>,
    ) -> Result<ScriptHandle, CompileError> {
        let mut propagation = Propagation::new();
        let root = self.compile_node(ast, scope, None, sink, &mut propagation)?;
        propagation.drain();
        Ok(ScriptHandle { root })
    }

    /// Evaluate a script once, without leaving anything attached.
    pub fn evaluate(&self, source: &str, scope: &Scope) -> Result<Option<Value>, CompileError> {
        let handle = self.attach(source, scope, None)?;
        let result = self.result(&handle);
        self.detach(&handle);
        Ok(result)
    }

    /// The current result of an attached script.
    pub fn result(&self, handle: &ScriptHandle) -> Option<Value> {
        self.node(handle.root).and_then(|node| node.current())
    }

    /// Detach a script: unsubscribe its nodes, revert its writes, retire
    /// its block instances and views. Idempotent.
    pub fn detach(&self, handle: &ScriptHandle) {
        let mut propagation = Propagation::new();
        self.detach_node(handle.root, &mut propagation);
        propagation.drain();
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<Rc<Node>> {
        self.inner.nodes.borrow().get(&id).cloned()
    }

    fn allocate_id(&self) -> NodeId {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        NodeId(id)
    }

    /// Compile one syntax tree into a node bound to `scope`, then
    /// evaluate it. Variable nodes subscribe; call arguments compile
    /// lazily when the call first reads them.
    pub(crate) fn compile_node(
        &self,
        ast: &Rc<Ast>,
        scope: &Scope,
        parent: Option<NodeId>,
        sink: Option<OutputSink>,
        propagation: &mut Propagation,
    ) -> Result<NodeId, CompileError> {
        let id = self.allocate_id();
        let kind = match &**ast {
            Ast::Number(n) => NodeKind::Literal(Value::Number(*n)),
            Ast::Str(s) => NodeKind::Literal(Value::Str(s.clone())),
            Ast::Variable { path } => NodeKind::Variable { path: path.clone() },
            Ast::Selector(text) => {
                return Err(CompileError::Selector { selector: text.to_string() });
            }
            Ast::Block { params, body } => NodeKind::Block(BlockData {
                params: params.clone(),
                body: body.clone(),
                instances: RefCell::new(HashMap::new()),
            }),
            Ast::Call { name, args } => {
                let literal_at = script::literal_argument(name);
                let mut operands = Vec::with_capacity(args.len());
                for (index, arg) in args.iter().enumerate() {
                    if literal_at == Some(index) {
                        match &**arg {
                            Ast::Variable { path } => operands.push(Operand::Raw(path.clone())),
                            _ => return Err(CompileError::AssignTarget),
                        }
                    } else {
                        match &**arg {
                            Ast::Number(n) => {
                                operands.push(Operand::Literal(Value::Number(*n)))
                            }
                            Ast::Str(s) => {
                                operands.push(Operand::Literal(Value::Str(s.clone())))
                            }
                            _ => operands.push(Operand::Pending(arg.clone())),
                        }
                    }
                }
                NodeKind::Call { name: name.clone(), operands: RefCell::new(operands) }
            }
        };
        let node = Rc::new(Node {
            id,
            kind,
            rank: ast.depth(),
            scope: scope.clone(),
            parent: Cell::new(parent),
            value: RefCell::new(None),
            sink: RefCell::new(sink),
            watcher: RefCell::new(None),
            collection_watch: RefCell::new(Vec::new()),
            running: Cell::new(false),
            executed: RefCell::new(None),
            condition_state: Cell::new(None),
            view: Cell::new(None),
        });
        self.inner.nodes.borrow_mut().insert(id, node.clone());

        if let NodeKind::Variable { path } = &node.kind {
            let weak = self.downgrade();
            let watcher: KeySubscriber = Rc::new(move |_new, _old, propagation| {
                if let Some(engine) = weak.upgrade() {
                    if let Some(node) = engine.node(id) {
                        propagation.schedule(Rc::new(eval::DirtyNode {
                            engine: engine.downgrade(),
                            node,
                        }));
                    }
                }
            });
            *node.watcher.borrow_mut() = Some(watcher.clone());
            scope.variables().subscribe_in(path, watcher, true, propagation);
        }

        eval::recompute(self, &node, propagation, false);
        Ok(id)
    }

    /// Remove a node and everything it built. Missing nodes are ignored,
    /// which makes detach idempotent and lets instances unwind in any
    /// order.
    pub(crate) fn detach_node(&self, id: NodeId, propagation: &mut Propagation) {
        let node = match self.inner.nodes.borrow_mut().remove(&id) {
            Some(node) => node,
            None => return,
        };
        debug!(id = id.0, "node detached");
        for watch in node.collection_watch.borrow_mut().drain(..) {
            match watch {
                CollectionWatch::Seq(seq, watcher) => seq.unwatch_in(&watcher, propagation),
                CollectionWatch::Store(store, observer) => store.unobserve(&observer),
            }
        }
        if let Some(key) = node.view.take() {
            self.drop_view(key);
        }
        match &node.kind {
            NodeKind::Variable { path } => {
                if let Some(watcher) = node.watcher.borrow_mut().take() {
                    node.scope
                        .variables()
                        .unsubscribe_in(path, &watcher, propagation);
                }
            }
            NodeKind::Call { operands, .. } => {
                if let Some(write) = node.executed.borrow_mut().take() {
                    self.revert_write(&node, write, propagation);
                }
                let children: Vec<NodeId> = operands
                    .borrow()
                    .iter()
                    .filter_map(|operand| match operand {
                        Operand::Child(child) => Some(*child),
                        _ => None,
                    })
                    .collect();
                for child in children {
                    self.detach_node(child, propagation);
                }
            }
            NodeKind::Block(data) => {
                let instances: Vec<_> = data.instances.borrow_mut().drain().collect();
                for (_, instance) in instances {
                    self.retire_instance(instance, propagation);
                }
            }
            NodeKind::Literal(_) => {}
        }
    }

    /// Undo a write a node performed, matching the layer it stacked by
    /// writer identity.
    pub(crate) fn revert_write(
        &self,
        node: &Node,
        write: ExecutedWrite,
        propagation: &mut Propagation,
    ) {
        match write {
            ExecutedWrite::Set { path, value } => {
                node.scope.variables().unset_in(
                    &path,
                    Some(value),
                    Some(WriterId::raw(node.id.0)),
                    propagation,
                );
            }
            ExecutedWrite::Removed { path, prior } => {
                if let Some(prior) = prior {
                    node.scope
                        .variables()
                        .set_in(&path, prior, None, false, propagation);
                }
            }
        }
    }

    pub(crate) fn retire_instance(
        &self,
        instance: super::node::BlockInstance,
        propagation: &mut Propagation,
    ) {
        for root in instance.roots {
            self.detach_node(root, propagation);
        }
        instance.scope.unset_scope();
    }

    /// Keep a view alive on behalf of the node that constructed it,
    /// detaching whatever view that node constructed before.
    pub(crate) fn register_view(&self, node: &Node, view: View) {
        if let Some(previous) = node.view.take() {
            self.drop_view(previous);
        }
        let key = self.inner.next_id.get();
        self.inner.next_id.set(key + 1);
        self.inner.views.borrow_mut().insert(key, view);
        node.view.set(Some(key));
    }

    fn drop_view(&self, key: u64) {
        if let Some(view) = self.inner.views.borrow_mut().remove(&key) {
            view.detach();
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
