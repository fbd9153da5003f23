//! Variable Scopes
//!
//! A scope owns two stacked stores, `variables` and `methods`, and an
//! optional parent. Linking to a parent merges the parent's variables in
//! underneath local ones, so inherited values show through until a local
//! set shadows them and reappear when it unwinds. Unlinking unmerges,
//! which retracts every inherited entry.
//!
//! Methods are not merged; lookup walks the chain instead, so a child
//! registration shadows without copying.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::store::{Propagation, Store};
use crate::value::Value;

struct ScopeInner {
    variables: Store,
    methods: Store,
    parent: RefCell<Option<Scope>>,
}

/// A variable scope. Cloning the handle aliases the scope.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                variables: Store::stacked(),
                methods: Store::stacked(),
                parent: RefCell::new(None),
            }),
        }
    }

    /// A fresh scope already linked under `self`.
    pub fn child(&self) -> Scope {
        let scope = Scope::new();
        scope.set_scope(self);
        scope
    }

    /// The stacked variable store expressions read and write.
    pub fn variables(&self) -> Store {
        self.inner.variables.clone()
    }

    pub fn methods(&self) -> Store {
        self.inner.methods.clone()
    }

    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.borrow().clone()
    }

    /// Link under a parent: inherited variables merge in underneath
    /// local ones.
    pub fn set_scope(&self, parent: &Scope) {
        debug!(
            scope = format_args!("0x{:x}", self.addr()),
            parent = format_args!("0x{:x}", parent.addr()),
            "scope linked"
        );
        *self.inner.parent.borrow_mut() = Some(parent.clone());
        self.inner.variables.merge(&parent.inner.variables, true);
    }

    /// Unlink from the current parent, retracting inherited variables.
    pub fn unset_scope(&self) {
        let parent = self.inner.parent.borrow_mut().take();
        if let Some(parent) = parent {
            debug!(scope = format_args!("0x{:x}", self.addr()), "scope unlinked");
            self.inner.variables.unmerge(&parent.inner.variables);
        }
    }

    /// Find a callable for `name`, walking this scope's methods and then
    /// the chain upward.
    pub fn lookup_method(&self, name: &str) -> Option<Value> {
        let mut scope = Some(self.clone());
        while let Some(current) = scope {
            if let Some(method) = current.inner.methods.get(name) {
                return Some(method);
            }
            scope = current.parent();
        }
        None
    }

    pub fn set_method(&self, name: &str, method: Value) {
        self.inner.methods.set(name, method);
    }

    pub fn unset_method(&self, name: &str, method: Value) {
        self.inner.methods.unset_value(name, method);
    }

    /// Read a variable through the chain's merged store.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.inner.variables.get(path)
    }

    pub fn set(&self, path: &str, value: impl Into<Value>) -> bool {
        self.inner.variables.set(path, value)
    }

    pub fn set_in(
        &self,
        path: &str,
        value: Value,
        propagation: &mut Propagation,
    ) -> bool {
        self.inner.variables.set_in(path, value, None, false, propagation)
    }

    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("addr", &format_args!("0x{:x}", self.addr()))
            .field("parent", &self.inner.parent.borrow().is_some())
            .finish()
    }
}
