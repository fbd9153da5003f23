//! Observable Store
//!
//! The key-value store at the heart of the engine. One observable core
//! serves three strategies, chosen at construction:
//!
//! - **plain**: last write wins, equal writes are silent no-ops
//! - **stacked**: writes push (value, writer) layers; the top layer is
//!   visible and unsetting it reveals the layer beneath
//! - **grouped**: writes accumulate into a per-key collection
//!
//! # How Notification Works
//!
//! 1. A mutation computes the visible transition (old, new) and only then
//!    dispatches: per-key subscribers first, then store-wide observers.
//!    Keys starting with `_` are private and skip store-wide observers.
//!
//! 2. Dotted keys (`a.b.c`) descend through nested stores, creating plain
//!    stores for missing segments. Subscribing to a dotted key installs a
//!    chain watcher on the head segment that re-hooks the tail whenever the
//!    head's value becomes a different store.
//!
//! 3. `merge` installs a store-wide bridge on the source that forwards
//!    every public transition into the target. Bridges consult the
//!    propagation memo before forwarding, so merge cycles stop at the
//!    bridge rather than half-applying.
//!
//! All callbacks receive the running `Propagation` and must use it for
//! writes they make, so the whole change settles as one unit.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::propagation::Propagation;
use crate::value::Value;

/// Per-key subscriber: `(new, old, propagation)`. A set delivers
/// `(Some(new), old)`; an unset delivers `(None, Some(removed))`.
pub type KeySubscriber = Rc<dyn Fn(Option<&Value>, Option<&Value>, &mut Propagation)>;

/// Store-wide observer: `(key, value, state, old, propagation)`. A set
/// delivers `(key, Some(new), true, old)`; an unset delivers
/// `(key, Some(removed), false, None)`.
pub type StoreSubscriber = Rc<dyn Fn(&str, Option<&Value>, bool, Option<&Value>, &mut Propagation)>;

/// Translates non-string keys into strings for stores configured with one.
pub type KeyAdapter = Rc<dyn Fn(&Value) -> Option<String>>;

/// Opaque identity of a writer, used by stack stores to match layers on
/// unset and by `write` to replace a writer's own layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterId(u64);

impl WriterId {
    /// Derive a writer identity from a label. Deterministic, so the same
    /// label names the same writer everywhere.
    pub fn of(label: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        label.hash(&mut hasher);
        Self(hasher.finish())
    }

    pub(crate) fn raw(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Plain,
    Stack,
    Group,
}

struct Layer {
    value: Value,
    writer: Option<WriterId>,
}

#[derive(Default)]
struct Entry {
    layers: SmallVec<[Layer; 2]>,
    watchers: Vec<KeyWatcher>,
}

impl Entry {
    fn visible(&self, strategy: Strategy) -> Option<Value> {
        match strategy {
            Strategy::Group => {
                if self.layers.is_empty() {
                    None
                } else {
                    Some(Value::List(Rc::new(
                        self.layers.iter().map(|l| l.value.clone()).collect(),
                    )))
                }
            }
            _ => self.layers.last().map(|l| l.value.clone()),
        }
    }
}

#[derive(Clone)]
enum KeyWatcher {
    Plain(KeySubscriber),
    /// Dotted subscription: observes the head segment and re-hooks the
    /// tail subscription into whatever store sits there.
    Chain {
        tail: Rc<str>,
        callback: KeySubscriber,
        hooked: Rc<RefCell<Option<Store>>>,
    },
}

#[derive(Clone)]
enum Observer {
    Plain(StoreSubscriber),
    /// Merge bridge: forwards public transitions into the target store.
    Bridge {
        target: Weak<RefCell<StoreInner>>,
        prepend: bool,
    },
}

struct StoreInner {
    strategy: Strategy,
    entries: IndexMap<String, Entry>,
    observers: Vec<Observer>,
    /// Sources merged into this store, for unmerge retraction.
    merged: Vec<Store>,
    /// The store and key this store was last nested under.
    parent: Option<(Weak<RefCell<StoreInner>>, String)>,
    adapter: Option<KeyAdapter>,
}

/// An observable key-value store. Cloning the handle aliases the state.
#[derive(Clone)]
pub struct Store {
    inner: Rc<RefCell<StoreInner>>,
}

impl Store {
    fn with_strategy(strategy: Strategy) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                strategy,
                entries: IndexMap::new(),
                observers: Vec::new(),
                merged: Vec::new(),
                parent: None,
                adapter: None,
            })),
        }
    }

    /// A plain store: last write wins.
    pub fn new() -> Self {
        Self::with_strategy(Strategy::Plain)
    }

    /// A stacked store: writes layer, unsets unwind.
    pub fn stacked() -> Self {
        Self::with_strategy(Strategy::Stack)
    }

    /// A grouped store: writes accumulate per key.
    pub fn grouped() -> Self {
        Self::with_strategy(Strategy::Group)
    }

    /// Configure a key adapter for non-string keys.
    pub fn with_key_adapter(self, adapter: KeyAdapter) -> Self {
        self.inner.borrow_mut().adapter = Some(adapter);
        self
    }

    /// Identity of this store, stable while any handle is alive.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    /// The store and key this store was last set under, if any.
    pub fn parent(&self) -> Option<(Store, String)> {
        let inner = self.inner.borrow();
        inner
            .parent
            .as_ref()
            .and_then(|(weak, key)| weak.upgrade().map(|rc| (Store { inner: rc }, key.clone())))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read the visible value, descending through dotted keys.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some((head, tail)) = key.split_once('.') {
            match self.get_local(head) {
                Some(Value::Store(child)) => child.get(tail),
                _ => None,
            }
        } else {
            self.get_local(key)
        }
    }

    fn get_local(&self, key: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        inner.entries.get(key).and_then(|e| e.visible(inner.strategy))
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Public keys with a value, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.borrow();
        inner
            .entries
            .iter()
            .filter(|(k, e)| !k.starts_with('_') && !e.layers.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .entries
            .iter()
            .filter(|(k, e)| !k.starts_with('_') && !e.layers.is_empty())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of public (key, visible value) pairs.
    pub(crate) fn public_entries(&self) -> Vec<(String, Value)> {
        let inner = self.inner.borrow();
        inner
            .entries
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .filter_map(|(k, e)| e.visible(inner.strategy).map(|v| (k.clone(), v)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Set a value. Returns whether the visible value changed.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let mut propagation = Propagation::new();
        let changed = self.set_in(key, value.into(), None, false, &mut propagation);
        propagation.drain();
        changed
    }

    /// Set a value tagged with a writer identity.
    pub fn set_as(&self, key: &str, value: impl Into<Value>, writer: WriterId) -> bool {
        let mut propagation = Propagation::new();
        let changed = self.set_in(key, value.into(), Some(writer), false, &mut propagation);
        propagation.drain();
        changed
    }

    /// Set inside a running propagation. `prepend` inserts a stacked layer
    /// at the bottom (or a grouped element at the front) instead of on top.
    /// On a stack a null value sinks to the bottom regardless, so it never
    /// hides a real value.
    pub fn set_in(
        &self,
        key: &str,
        value: Value,
        writer: Option<WriterId>,
        prepend: bool,
        propagation: &mut Propagation,
    ) -> bool {
        if let Some((head, tail)) = key.split_once('.') {
            let child = self.ensure_child(head, propagation);
            return child.set_in(tail, value, writer, prepend, propagation);
        }

        let strategy;
        let old_visible;
        let new_visible;
        {
            let mut inner = self.inner.borrow_mut();
            strategy = inner.strategy;
            let entry = inner.entries.entry(key.to_string()).or_default();
            old_visible = entry.visible(strategy);
            match strategy {
                Strategy::Plain => {
                    if let Some(old) = &old_visible {
                        if *old == value {
                            return false;
                        }
                    }
                    entry.layers.clear();
                    entry.layers.push(Layer { value: value.clone(), writer });
                }
                Strategy::Stack => {
                    let layer = Layer { value: value.clone(), writer };
                    // Null writes sink to the bottom so a real value
                    // stays visible.
                    if prepend || matches!(layer.value, Value::Null) {
                        entry.layers.insert(0, layer);
                    } else {
                        entry.layers.push(layer);
                    }
                }
                Strategy::Group => {
                    let layer = Layer { value: value.clone(), writer };
                    if prepend {
                        entry.layers.insert(0, layer);
                    } else {
                        entry.layers.push(layer);
                    }
                }
            }
            new_visible = entry.visible(strategy);
        }
        trace!(store = format_args!("0x{:x}", self.addr()), key, "set");
        self.adopt(key, &value);

        if strategy == Strategy::Group {
            // Grouped stores feed element-level additions.
            self.notify(key, Some(&value), None, true, propagation);
            return true;
        }
        if old_visible == new_visible {
            return false;
        }
        self.notify(key, new_visible.as_ref(), old_visible.as_ref(), true, propagation);
        true
    }

    /// Remove whatever is visible at `key`.
    pub fn unset(&self, key: &str) -> bool {
        let mut propagation = Propagation::new();
        let changed = self.unset_in(key, None, None, &mut propagation);
        propagation.drain();
        changed
    }

    /// Remove a matching value at `key`.
    pub fn unset_value(&self, key: &str, value: impl Into<Value>) -> bool {
        let mut propagation = Propagation::new();
        let changed = self.unset_in(key, Some(value.into()), None, &mut propagation);
        propagation.drain();
        changed
    }

    /// Remove a matching value written by `writer`.
    pub fn unset_as(&self, key: &str, value: impl Into<Value>, writer: WriterId) -> bool {
        let mut propagation = Propagation::new();
        let changed = self.unset_in(key, Some(value.into()), Some(writer), &mut propagation);
        propagation.drain();
        changed
    }

    /// Unset inside a running propagation. A `None` value matches the top
    /// layer; a `Some` value matches the topmost equal layer. A writer
    /// argument restricts the match to layers that writer set.
    pub fn unset_in(
        &self,
        key: &str,
        value: Option<Value>,
        writer: Option<WriterId>,
        propagation: &mut Propagation,
    ) -> bool {
        if let Some((head, tail)) = key.split_once('.') {
            match self.get_local(head) {
                Some(Value::Store(child)) => {
                    return child.unset_in(tail, value, writer, propagation)
                }
                _ => return false,
            }
        }

        let strategy;
        let removed;
        let mut revealed = None;
        {
            let mut inner = self.inner.borrow_mut();
            strategy = inner.strategy;
            let entry = match inner.entries.get_mut(key) {
                Some(entry) if !entry.layers.is_empty() => entry,
                _ => return false,
            };
            let index = match entry.layers.iter().rposition(|layer| {
                value.as_ref().map_or(true, |v| layer.value == *v)
                    && writer.map_or(true, |w| layer.writer == Some(w))
            }) {
                Some(index) => index,
                None => return false,
            };
            let was_top = index == entry.layers.len() - 1;
            removed = entry.layers.remove(index).value;
            if strategy != Strategy::Group {
                if !was_top {
                    // A buried layer left without changing the visible value.
                    trace!(store = format_args!("0x{:x}", self.addr()), key, "buried layer removed");
                    return false;
                }
                revealed = entry.visible(strategy);
            }
        }
        trace!(store = format_args!("0x{:x}", self.addr()), key, "unset");

        match strategy {
            Strategy::Group => {
                // Grouped stores feed element-level removals.
                self.notify(key, None, Some(&removed), false, propagation);
                true
            }
            _ => match revealed {
                Some(new_top) if new_top == removed => false,
                Some(new_top) => {
                    // Unwinding the top layer reveals the one beneath.
                    self.notify(key, Some(&new_top), Some(&removed), true, propagation);
                    true
                }
                None => {
                    self.notify(key, None, Some(&removed), false, propagation);
                    true
                }
            },
        }
    }

    /// Replace this writer's own value for `key`, wherever its layer sits.
    /// `None` retracts the writer's value. Unlike `set`, repeated writes by
    /// one writer never accumulate layers.
    pub fn write(&self, key: &str, value: Option<Value>) -> bool {
        let mut propagation = Propagation::new();
        let changed = self.write_in(key, value, None, &mut propagation);
        propagation.drain();
        changed
    }

    pub fn write_as(&self, key: &str, value: Option<Value>, writer: WriterId) -> bool {
        let mut propagation = Propagation::new();
        let changed = self.write_in(key, value, Some(writer), &mut propagation);
        propagation.drain();
        changed
    }

    pub fn write_in(
        &self,
        key: &str,
        value: Option<Value>,
        writer: Option<WriterId>,
        propagation: &mut Propagation,
    ) -> bool {
        let strategy = self.inner.borrow().strategy;
        if strategy != Strategy::Stack {
            return match value {
                Some(v) => self.set_in(key, v, writer, false, propagation),
                None => self.unset_in(key, None, writer, propagation),
            };
        }

        let position = {
            let inner = self.inner.borrow();
            inner.entries.get(key).and_then(|entry| {
                entry.layers.iter().rposition(|layer| layer.writer == writer)
            })
        };
        match (position, value) {
            (Some(index), Some(new)) => {
                let (old_visible, was_top) = {
                    let mut inner = self.inner.borrow_mut();
                    let entry = inner.entries.get_mut(key).expect("entry vanished");
                    let was_top = index == entry.layers.len() - 1;
                    let old = entry.layers[index].value.clone();
                    entry.layers[index].value = new.clone();
                    (old, was_top)
                };
                self.adopt(key, &new);
                if was_top && old_visible != new {
                    self.notify(key, Some(&new), Some(&old_visible), true, propagation);
                    true
                } else {
                    false
                }
            }
            (Some(_), None) => {
                let own = {
                    let inner = self.inner.borrow();
                    inner.entries.get(key).and_then(|entry| {
                        entry
                            .layers
                            .iter()
                            .rev()
                            .find(|layer| layer.writer == writer)
                            .map(|layer| layer.value.clone())
                    })
                };
                match own {
                    Some(v) => self.unset_in(key, Some(v), writer, propagation),
                    None => false,
                }
            }
            (None, Some(new)) => self.set_in(key, new, writer, false, propagation),
            (None, None) => false,
        }
    }

    /// Deep merge of a store-shaped value: store values recurse per entry,
    /// everything else sets (or unsets, when `state` is false).
    pub fn mix(
        &self,
        key: Option<&str>,
        value: &Value,
        state: bool,
        prepend: bool,
        propagation: &mut Propagation,
    ) {
        match (key, value) {
            (prefix, Value::Store(source)) => {
                for (k, v) in source.public_entries() {
                    let path = match prefix {
                        Some(p) => format!("{}.{}", p, k),
                        None => k,
                    };
                    self.mix(Some(&path), &v, state, prepend, propagation);
                }
            }
            (Some(k), v) => {
                if state {
                    self.set_in(k, v.clone(), None, prepend, propagation);
                } else {
                    self.unset_in(k, Some(v.clone()), None, propagation);
                }
            }
            (None, _) => {}
        }
    }

    /// Set with a non-string key through the configured adapter. A store
    /// without an adapter treats this as a programming error.
    pub fn set_keyed(&self, key: &Value, value: impl Into<Value>) -> bool {
        let adapter = self.inner.borrow().adapter.clone();
        let adapted = adapter
            .and_then(|f| f(key))
            .unwrap_or_else(|| panic!("store key must be a string (no key adapter configured)"));
        self.set(&adapted, value)
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    /// Subscribe to a key. Unless `lazy`, the current value delivers
    /// immediately. Dotted keys install chain watchers along the path.
    pub fn subscribe(&self, key: &str, callback: KeySubscriber, lazy: bool) {
        let mut propagation = Propagation::new();
        self.subscribe_in(key, callback, lazy, &mut propagation);
        propagation.drain();
    }

    pub fn subscribe_in(
        &self,
        key: &str,
        callback: KeySubscriber,
        lazy: bool,
        propagation: &mut Propagation,
    ) {
        if let Some((head, tail)) = key.split_once('.') {
            let hooked = Rc::new(RefCell::new(None));
            if let Some(Value::Store(child)) = self.get_local(head) {
                *hooked.borrow_mut() = Some(child);
            }
            {
                let mut inner = self.inner.borrow_mut();
                let entry = inner.entries.entry(head.to_string()).or_default();
                entry.watchers.push(KeyWatcher::Chain {
                    tail: Rc::from(tail),
                    callback: callback.clone(),
                    hooked: hooked.clone(),
                });
            }
            let child = hooked.borrow().clone();
            if let Some(child) = child {
                child.subscribe_in(tail, callback, lazy, propagation);
            }
            return;
        }

        {
            let mut inner = self.inner.borrow_mut();
            let entry = inner.entries.entry(key.to_string()).or_default();
            entry.watchers.push(KeyWatcher::Plain(callback.clone()));
        }
        if !lazy {
            if let Some(current) = self.get_local(key) {
                callback(Some(&current), None, propagation);
            }
        }
    }

    /// Remove a subscription by callback identity. Delivers a retraction
    /// `(None, current)` so the observer can undo its effect.
    pub fn unsubscribe(&self, key: &str, callback: &KeySubscriber) {
        let mut propagation = Propagation::new();
        self.unsubscribe_in(key, callback, &mut propagation);
        propagation.drain();
    }

    pub fn unsubscribe_in(
        &self,
        key: &str,
        callback: &KeySubscriber,
        propagation: &mut Propagation,
    ) {
        if let Some((head, tail)) = key.split_once('.') {
            let hooked = {
                let mut inner = self.inner.borrow_mut();
                let entry = match inner.entries.get_mut(head) {
                    Some(entry) => entry,
                    None => return,
                };
                let position = entry.watchers.iter().position(|w| match w {
                    KeyWatcher::Chain { tail: t, callback: c, .. } => {
                        **t == *tail && Rc::ptr_eq(c, callback)
                    }
                    _ => false,
                });
                match position {
                    Some(position) => match entry.watchers.remove(position) {
                        KeyWatcher::Chain { hooked, .. } => hooked.borrow_mut().take(),
                        _ => None,
                    },
                    None => return,
                }
            };
            if let Some(child) = hooked {
                child.unsubscribe_in(tail, callback, propagation);
            }
            return;
        }

        let removed = {
            let mut inner = self.inner.borrow_mut();
            let entry = match inner.entries.get_mut(key) {
                Some(entry) => entry,
                None => return,
            };
            let position = entry.watchers.iter().position(|w| match w {
                KeyWatcher::Plain(c) => Rc::ptr_eq(c, callback),
                _ => false,
            });
            match position {
                Some(position) => {
                    entry.watchers.remove(position);
                    true
                }
                None => false,
            }
        };
        if removed {
            if let Some(current) = self.get_local(key) {
                callback(None, Some(&current), propagation);
            }
        }
    }

    /// Observe every public transition on this store. Delivery starts with
    /// the next change; `merge` is the way to also receive current state.
    pub fn observe(&self, callback: StoreSubscriber) {
        self.inner.borrow_mut().observers.push(Observer::Plain(callback));
    }

    pub fn unobserve(&self, callback: &StoreSubscriber) {
        self.inner.borrow_mut().observers.retain(|o| match o {
            Observer::Plain(c) => !Rc::ptr_eq(c, callback),
            _ => true,
        });
    }

    // ------------------------------------------------------------------
    // Merging
    // ------------------------------------------------------------------

    /// Merge `source` into this store: sync its public entries now and
    /// forward its future transitions. With `prepend`, forwarded stack
    /// layers sit under locally written ones, which is how inherited scope
    /// values stay shadowed by local ones.
    pub fn merge(&self, source: &Store, prepend: bool) {
        let mut propagation = Propagation::new();
        self.merge_in(source, prepend, &mut propagation);
        propagation.drain();
    }

    pub fn merge_in(&self, source: &Store, prepend: bool, propagation: &mut Propagation) {
        debug!(
            target_store = format_args!("0x{:x}", self.addr()),
            source_store = format_args!("0x{:x}", source.addr()),
            prepend,
            "merge"
        );
        source.inner.borrow_mut().observers.push(Observer::Bridge {
            target: Rc::downgrade(&self.inner),
            prepend,
        });
        self.inner.borrow_mut().merged.push(source.clone());
        for (key, value) in source.public_entries() {
            self.set_in(&key, value, None, prepend, propagation);
        }
    }

    /// Undo a merge: stop forwarding and retract every forwarded entry.
    pub fn unmerge(&self, source: &Store) {
        let mut propagation = Propagation::new();
        self.unmerge_in(source, &mut propagation);
        propagation.drain();
    }

    pub fn unmerge_in(&self, source: &Store, propagation: &mut Propagation) {
        debug!(
            target_store = format_args!("0x{:x}", self.addr()),
            source_store = format_args!("0x{:x}", source.addr()),
            "unmerge"
        );
        let self_addr = Rc::as_ptr(&self.inner);
        source.inner.borrow_mut().observers.retain(|o| match o {
            Observer::Bridge { target, .. } => target.as_ptr() != self_addr,
            _ => true,
        });
        let source_addr = source.addr();
        self.inner.borrow_mut().merged.retain(|s| s.addr() != source_addr);
        for (key, value) in source.public_entries() {
            self.unset_in(&key, Some(value), None, propagation);
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_child(&self, key: &str, propagation: &mut Propagation) -> Store {
        if let Some(Value::Store(child)) = self.get_local(key) {
            return child;
        }
        let child = Store::new();
        self.set_in(key, Value::Store(child.clone()), None, false, propagation);
        child
    }

    fn adopt(&self, key: &str, value: &Value) {
        if let Value::Store(child) = value {
            child.inner.borrow_mut().parent = Some((Rc::downgrade(&self.inner), key.to_string()));
        }
    }

    /// Dispatch one visible transition. `state` is true for sets (including
    /// stack reveals) and false when the key emptied. At most one dispatch
    /// per (store, key) per propagation.
    fn notify(
        &self,
        key: &str,
        new: Option<&Value>,
        old: Option<&Value>,
        state: bool,
        propagation: &mut Propagation,
    ) {
        if !propagation.enter(self.addr(), key) {
            return;
        }
        let (key_watchers, observers) = {
            let inner = self.inner.borrow();
            let key_watchers = inner
                .entries
                .get(key)
                .map(|e| e.watchers.clone())
                .unwrap_or_default();
            let observers = if key.starts_with('_') {
                Vec::new()
            } else {
                inner.observers.clone()
            };
            (key_watchers, observers)
        };

        for watcher in key_watchers {
            match watcher {
                KeyWatcher::Plain(callback) => callback(new, old, propagation),
                KeyWatcher::Chain { tail, callback, hooked } => {
                    let previous = hooked.borrow_mut().take();
                    if let Some(previous) = previous {
                        previous.unsubscribe_in(&tail, &callback, propagation);
                    }
                    if let Some(Value::Store(child)) = new {
                        *hooked.borrow_mut() = Some(child.clone());
                        child.subscribe_in(&tail, callback, false, propagation);
                    }
                }
            }
        }

        for observer in observers {
            match observer {
                Observer::Plain(callback) => {
                    // Store-wide observers receive the affected value in the
                    // value slot even on unset, with state distinguishing.
                    if state {
                        callback(key, new, true, old, propagation);
                    } else {
                        callback(key, old, false, None, propagation);
                    }
                }
                Observer::Bridge { target, prepend } => {
                    let target = match target.upgrade() {
                        Some(inner) => Store { inner },
                        None => continue,
                    };
                    if propagation.entered(target.addr(), key) {
                        continue;
                    }
                    if state {
                        if let Some(new) = new {
                            target.set_in(key, new.clone(), None, prepend, propagation);
                        }
                        if let Some(old) = old {
                            target.unset_in(key, Some(old.clone()), None, propagation);
                        }
                    } else if let Some(old) = old {
                        target.unset_in(key, Some(old.clone()), None, propagation);
                    }
                }
            }
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("addr", &format_args!("0x{:x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting_subscriber(log: Rc<RefCell<Vec<(Option<Value>, Option<Value>)>>>) -> KeySubscriber {
        Rc::new(move |new, old, _prop| {
            log.borrow_mut().push((new.cloned(), old.cloned()));
        })
    }

    #[test]
    fn plain_set_get_unset() {
        let store = Store::new();
        assert!(store.set("a", 1.0));
        assert_eq!(store.get("a"), Some(Value::from(1.0)));
        assert!(store.unset("a"));
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn equal_set_is_silent() {
        let store = Store::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        store.subscribe(
            "a",
            Rc::new(move |_, _, _| count2.set(count2.get() + 1)),
            true,
        );
        assert!(store.set("a", 5.0));
        assert!(!store.set("a", 5.0));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn stack_layers_unwind() {
        let store = Store::stacked();
        store.set("color", "red");
        store.set("color", "blue");
        assert_eq!(store.get("color"), Some(Value::from("blue")));

        // Removing the top layer reveals the one beneath.
        assert!(store.unset_value("color", "blue"));
        assert_eq!(store.get("color"), Some(Value::from("red")));
        assert!(store.unset_value("color", "red"));
        assert_eq!(store.get("color"), None);
    }

    #[test]
    fn stack_null_sinks_under_real_values() {
        let store = Store::stacked();
        store.set("color", "red");
        assert!(!store.set("color", Value::Null));
        assert_eq!(store.get("color"), Some(Value::from("red")));

        // Unwinding the real value reveals the buried null.
        assert!(store.unset_value("color", "red"));
        assert_eq!(store.get("color"), Some(Value::Null));
    }

    #[test]
    fn stack_unset_matches_writer() {
        let store = Store::stacked();
        let theme = WriterId::of("theme");
        let user = WriterId::of("user");
        store.set_as("size", 10.0, theme);
        store.set_as("size", 10.0, user);

        // Unset by the buried writer removes its layer, not the visible one.
        assert!(!store.unset_as("size", 10.0, theme));
        assert_eq!(store.get("size"), Some(Value::from(10.0)));
        assert!(store.unset_as("size", 10.0, user));
        assert_eq!(store.get("size"), None);
    }

    #[test]
    fn stack_buried_removal_is_silent() {
        let store = Store::stacked();
        let log = Rc::new(RefCell::new(Vec::new()));
        store.set("x", 1.0);
        store.set("x", 2.0);
        store.subscribe("x", counting_subscriber(log.clone()), true);
        assert!(!store.unset_value("x", 1.0));
        assert!(log.borrow().is_empty());
        assert_eq!(store.get("x"), Some(Value::from(2.0)));
    }

    #[test]
    fn group_accumulates() {
        let store = Store::grouped();
        store.set("tags", "a");
        store.set("tags", "b");
        match store.get("tags") {
            Some(Value::List(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0], Value::from("a"));
            }
            other => panic!("expected list, got {:?}", other),
        }
        store.unset_value("tags", "a");
        match store.get("tags") {
            Some(Value::List(items)) => assert_eq!(items.len(), 1),
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn dotted_set_constructs_path() {
        let store = Store::new();
        store.set("a.b.c", 3.0);
        assert_eq!(store.get("a.b.c"), Some(Value::from(3.0)));
        match store.get("a") {
            Some(Value::Store(child)) => {
                assert_eq!(child.get("b.c"), Some(Value::from(3.0)));
                assert_eq!(child.parent().map(|(_, k)| k), Some("a".to_string()));
            }
            other => panic!("expected nested store, got {:?}", other),
        }
    }

    #[test]
    fn chain_watcher_rehooks() {
        let store = Store::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        store.set("a.b", 1.0);
        store.subscribe("a.b", counting_subscriber(log.clone()), false);
        assert_eq!(log.borrow().len(), 1); // immediate delivery

        // Replacing the intermediate store retracts the old leaf and
        // delivers the new one.
        let replacement = Store::new();
        replacement.set("b", 9.0);
        store.set("a", replacement);
        let entries = log.borrow();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1], (None, Some(Value::from(1.0))));
        assert_eq!(entries[2], (Some(Value::from(9.0)), None));
    }

    #[test]
    fn unsubscribe_fires_retraction() {
        let store = Store::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let callback = counting_subscriber(log.clone());
        store.set("a", 1.0);
        store.subscribe("a", callback.clone(), false);
        store.unsubscribe("a", &callback);
        assert_eq!(
            *log.borrow(),
            vec![
                (Some(Value::from(1.0)), None),
                (None, Some(Value::from(1.0))),
            ]
        );
        // Further sets do not reach the removed subscriber.
        store.set("a", 2.0);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn private_keys_skip_observers() {
        let store = Store::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        store.observe(Rc::new(move |key, _, _, _, _| {
            seen2.borrow_mut().push(key.to_string());
        }));
        store.set("_private", 1.0);
        store.set("public", 2.0);
        assert_eq!(*seen.borrow(), vec!["public".to_string()]);

        // Private keys stay individually subscribable.
        let log = Rc::new(RefCell::new(Vec::new()));
        store.subscribe("_private", counting_subscriber(log.clone()), false);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn merge_forwards_and_unmerge_retracts() {
        let parent = Store::stacked();
        let child = Store::stacked();
        parent.set("a", 1.0);
        child.merge(&parent, true);
        assert_eq!(child.get("a"), Some(Value::from(1.0)));

        // Local writes shadow merged ones.
        child.set("a", 2.0);
        assert_eq!(child.get("a"), Some(Value::from(2.0)));

        // Parent changes keep flowing underneath.
        parent.set("b", 3.0);
        assert_eq!(child.get("b"), Some(Value::from(3.0)));

        child.unmerge(&parent);
        assert_eq!(child.get("a"), Some(Value::from(2.0)));
        assert_eq!(child.get("b"), None);
    }

    #[test]
    fn merged_parent_update_replaces_under_shadow() {
        let parent = Store::stacked();
        let child = Store::stacked();
        parent.set("x", 1.0);
        child.merge(&parent, true);
        parent.set("x", 5.0);
        assert_eq!(child.get("x"), Some(Value::from(5.0)));
        // The old forwarded layer was unset, so unwinding reveals nothing.
        assert!(child.unset_value("x", 5.0));
        assert_eq!(child.get("x"), None);
    }

    #[test]
    fn write_replaces_in_place() {
        let store = Store::stacked();
        let w = WriterId::of("w");
        store.set("k", 1.0);
        store.write_as("k", Some(Value::from(2.0)), w);
        store.write_as("k", Some(Value::from(3.0)), w);
        assert_eq!(store.get("k"), Some(Value::from(3.0)));
        // One layer per writer: retracting it reveals the base value.
        store.write_as("k", None, w);
        assert_eq!(store.get("k"), Some(Value::from(1.0)));
    }

    #[test]
    fn write_back_terminates() {
        let store = Store::new();
        let handle = store.clone();
        store.subscribe(
            "n",
            Rc::new(move |new, _old, prop| {
                if let Some(Value::Number(n)) = new {
                    if *n < 100.0 {
                        handle.set_in("n", Value::from(n + 1.0), None, false, prop);
                    }
                }
            }),
            true,
        );
        // The write-back applies but notifies only once per propagation.
        store.set("n", 1.0);
        assert_eq!(store.get("n"), Some(Value::from(2.0)));
    }

    #[test]
    #[should_panic(expected = "no key adapter")]
    fn non_string_key_without_adapter_panics() {
        let store = Store::new();
        store.set_keyed(&Value::from(1.0), 2.0);
    }

    #[test]
    fn key_adapter_translates() {
        let store = Store::new().with_key_adapter(Rc::new(|v| match v {
            Value::Number(n) => Some(format!("n{}", n)),
            _ => None,
        }));
        store.set_keyed(&Value::from(3.0), "x");
        assert_eq!(store.get("n3"), Some(Value::from("x")));
    }
}
