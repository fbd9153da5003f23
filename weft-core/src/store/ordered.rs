//! Ordered Store
//!
//! An index-addressed observable sequence. Subscribers see every element
//! transition together with its index and a provenance tag, which is what
//! lets derived views (filter, map, sort) maintain themselves incrementally
//! instead of recomputing.
//!
//! # Splice Notification
//!
//! `splice` is the primitive mutation; push/pop/shift/unshift and indexed
//! set/unset are sugar over it. One splice emits, in order:
//!
//! 1. For every slot where a removed element is replaced by an inserted
//!    one: an unset of the old value, then a set of the new, both tagged
//!    `Replaced` (removal first).
//! 2. When the sequence grows: for every shifted tail element, right to
//!    left, an unset at the old index then a set at the new index, tagged
//!    `Moved`; then a plain `Fresh` set per remaining insertion.
//! 3. When the sequence shrinks: a `Fresh` unset per surplus removal, then
//!    the tail shifts left to right with `Moved` pairs.
//!
//! The sequence mutates before anything notifies, so callbacks observing
//! `get`/`len` see the settled result. Each changed index fires exactly
//! once per role.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use super::propagation::Propagation;
use crate::value::Value;

/// Provenance of an index notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Newly inserted, or finally removed.
    Fresh,
    /// Replaced in place at this index.
    Replaced,
    /// Shifted by a splice elsewhere. On a set this carries the old index;
    /// on an unset it carries the index the element went to.
    Moved(usize),
}

/// Index subscriber: `(value, index, state, origin, propagation)`.
pub type IndexSubscriber = Rc<dyn Fn(&Value, usize, bool, Origin, &mut Propagation)>;

struct SeqInner {
    items: Vec<Value>,
    watchers: Vec<IndexSubscriber>,
}

/// An observable sequence. Cloning the handle aliases the state.
#[derive(Clone)]
pub struct Seq {
    inner: Rc<RefCell<SeqInner>>,
}

enum Event {
    Set(Value, usize, Origin),
    Unset(Value, usize, Origin),
}

impl Seq {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SeqInner {
                items: Vec::new(),
                watchers: Vec::new(),
            })),
        }
    }

    pub fn from_values(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SeqInner {
                items,
                watchers: Vec::new(),
            })),
        }
    }

    /// Identity of this sequence, stable while any handle is alive.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.borrow().items.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    pub fn first(&self) -> Option<Value> {
        self.get(0)
    }

    pub fn last(&self) -> Option<Value> {
        let inner = self.inner.borrow();
        inner.items.last().cloned()
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.inner.borrow().items.iter().position(|v| v == value)
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.borrow().items.clone()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    pub fn push(&self, value: impl Into<Value>) {
        let len = self.len();
        self.splice(len, 0, vec![value.into()]);
    }

    pub fn pop(&self) -> Option<Value> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.splice(len - 1, 1, Vec::new()).into_iter().next()
    }

    pub fn shift(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        self.splice(0, 1, Vec::new()).into_iter().next()
    }

    pub fn unshift(&self, value: impl Into<Value>) {
        self.splice(0, 0, vec![value.into()]);
    }

    /// Replace the element at `index` (or append when `index` is the
    /// current length).
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let remove = if index < self.len() { 1 } else { 0 };
        self.splice(index, remove, vec![value.into()]);
    }

    /// Remove the element at `index`.
    pub fn unset(&self, index: usize) -> Option<Value> {
        if index >= self.len() {
            return None;
        }
        self.splice(index, 1, Vec::new()).into_iter().next()
    }

    /// Remove `remove` elements at `start` and insert `insert` in their
    /// place. Returns the removed elements.
    pub fn splice(&self, start: usize, remove: usize, insert: Vec<Value>) -> Vec<Value> {
        let mut propagation = Propagation::new();
        let removed = self.splice_in(start, remove, insert, &mut propagation);
        propagation.drain();
        removed
    }

    pub fn splice_in(
        &self,
        start: usize,
        remove: usize,
        insert: Vec<Value>,
        propagation: &mut Propagation,
    ) -> Vec<Value> {
        let (removed, events) = {
            let mut inner = self.inner.borrow_mut();
            let old_len = inner.items.len();
            let start = start.min(old_len);
            let remove = remove.min(old_len - start);
            let overlap = remove.min(insert.len());
            let shift = insert.len() as isize - remove as isize;

            let removed: Vec<Value> =
                inner.items.splice(start..start + remove, insert.clone()).collect();

            let mut events = Vec::new();
            for i in 0..overlap {
                events.push(Event::Unset(removed[i].clone(), start + i, Origin::Replaced));
                events.push(Event::Set(insert[i].clone(), start + i, Origin::Replaced));
            }
            if shift > 0 {
                // Tail moves right; emit right to left so no index aliases.
                for j in (start + remove..old_len).rev() {
                    let to = (j as isize + shift) as usize;
                    let value = inner.items[to].clone();
                    events.push(Event::Unset(value.clone(), j, Origin::Moved(to)));
                    events.push(Event::Set(value, to, Origin::Moved(j)));
                }
                for i in overlap..insert.len() {
                    events.push(Event::Set(insert[i].clone(), start + i, Origin::Fresh));
                }
            } else if shift < 0 {
                for i in overlap..remove {
                    events.push(Event::Unset(removed[i].clone(), start + i, Origin::Fresh));
                }
                // Tail moves left; emit left to right.
                for j in start + remove..old_len {
                    let to = (j as isize + shift) as usize;
                    let value = inner.items[to].clone();
                    events.push(Event::Unset(value.clone(), j, Origin::Moved(to)));
                    events.push(Event::Set(value, to, Origin::Moved(j)));
                }
            }
            (removed, events)
        };
        trace!(
            seq = format_args!("0x{:x}", self.addr()),
            start,
            removed = removed.len(),
            "splice"
        );

        let watchers = self.inner.borrow().watchers.clone();
        for event in &events {
            for watcher in &watchers {
                match event {
                    Event::Set(value, index, origin) => {
                        watcher(value, *index, true, *origin, propagation)
                    }
                    Event::Unset(value, index, origin) => {
                        watcher(value, *index, false, *origin, propagation)
                    }
                }
            }
        }
        removed
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    /// Watch the sequence. Every current element delivers immediately as a
    /// `Fresh` set, then changes follow.
    pub fn watch(&self, watcher: IndexSubscriber) {
        let mut propagation = Propagation::new();
        self.watch_in(watcher, &mut propagation);
        propagation.drain();
    }

    pub fn watch_in(&self, watcher: IndexSubscriber, propagation: &mut Propagation) {
        self.inner.borrow_mut().watchers.push(watcher.clone());
        let items = self.to_vec();
        for (index, value) in items.iter().enumerate() {
            watcher(value, index, true, Origin::Fresh, propagation);
        }
    }

    /// Stop watching. Every current element retracts as a `Fresh` unset.
    pub fn unwatch(&self, watcher: &IndexSubscriber) {
        let mut propagation = Propagation::new();
        self.unwatch_in(watcher, &mut propagation);
        propagation.drain();
    }

    pub fn unwatch_in(&self, watcher: &IndexSubscriber, propagation: &mut Propagation) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let before = inner.watchers.len();
            inner.watchers.retain(|w| !Rc::ptr_eq(w, watcher));
            inner.watchers.len() != before
        };
        if removed {
            let items = self.to_vec();
            for (index, value) in items.iter().enumerate().rev() {
                watcher(value, index, false, Origin::Fresh, propagation);
            }
        }
    }
}

impl Default for Seq {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seq")
            .field("addr", &format_args!("0x{:x}", self.addr()))
            .field("items", &self.inner.borrow().items)
            .finish()
    }
}
