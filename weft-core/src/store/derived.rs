//! Live Derived Views
//!
//! Views over an ordered store that maintain their result incrementally:
//! filter, map, sort, every and some. A view subscribes to its source and
//! reacts per element transition; it never recomputes from scratch.
//!
//! # How It Works
//!
//! Each view keeps per-source-index bookkeeping in a sparse index map,
//! mutated in lockstep with the source's notifications: `Fresh` sets insert
//! a slot, `Fresh` unsets remove one, `Replaced` re-evaluates in place, and
//! `Moved` pairs carry a slot from old index to new without re-evaluating.
//! A splice notifies every shifted element, so after its notifications
//! settle the keys are contiguous again.
//!
//! Predicates and mappers are either native closures (resolved inline) or
//! compiled block templates invoked through the engine's yield protocol.
//! Block results arrive through a yielder callback keyed by source index,
//! which may be later in the same propagation, or much later when a scope
//! variable the block reads changes. Either way the result lands in
//! `resolve`, which splices the output at the position the bookkeeping
//! implies.
//!
//! Views hold their source subscription until `detach`, which retracts
//! every element and so empties the output and retires block instances.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::ordered::{IndexSubscriber, Origin, Seq};
use super::propagation::Propagation;
use crate::graph::{NodeId, WeakEngine};
use crate::value::Value;

/// A filter/every/some predicate: a native closure or a compiled block.
#[derive(Clone)]
pub enum Predicate {
    Native(Rc<dyn Fn(&Value, usize) -> bool>),
    Block { engine: WeakEngine, template: NodeId },
}

/// A map function: a native closure or a compiled block.
#[derive(Clone)]
pub enum Mapper {
    Native(Rc<dyn Fn(&Value, usize) -> Option<Value>>),
    Block { engine: WeakEngine, template: NodeId },
}

/// Comparator for sorted views.
pub type Comparator = Rc<dyn Fn(&Value, &Value) -> Ordering>;

/// Sink notified when a live boolean (every/some) changes.
pub type FlagSink = Rc<dyn Fn(bool, &mut Propagation)>;

// ----------------------------------------------------------------------------
// Filter
// ----------------------------------------------------------------------------

struct FilterSlot {
    value: Value,
    /// None while a block result is pending.
    flag: Option<bool>,
}

struct FilterCore {
    output: Seq,
    predicate: Predicate,
    slots: RefCell<BTreeMap<usize, FilterSlot>>,
    carry: RefCell<HashMap<usize, FilterSlot>>,
    yielder: crate::graph::Yielder,
}

/// A live filter over an ordered store, preserving source order.
pub struct LiveFilter {
    source: Seq,
    core: Rc<FilterCore>,
    watcher: IndexSubscriber,
}

impl FilterCore {
    /// Output position a source index maps to: included slots before it.
    fn position(&self, index: usize) -> usize {
        self.slots
            .borrow()
            .range(..index)
            .filter(|(_, slot)| slot.flag == Some(true))
            .count()
    }

    fn evaluate(self: &Rc<Self>, value: &Value, index: usize, origin: Origin, propagation: &mut Propagation) {
        match &self.predicate {
            Predicate::Native(f) => {
                let passing = f(value, index);
                self.resolve(index, passing, propagation);
            }
            Predicate::Block { engine, template } => {
                if let Some(engine) = engine.upgrade() {
                    engine.block_yield(
                        *template,
                        &[value.clone(), Value::from(index)],
                        Some(index),
                        origin,
                        self.yielder.clone(),
                        propagation,
                    );
                }
            }
        }
    }

    fn retire(&self, index: usize, propagation: &mut Propagation) {
        if let Predicate::Block { engine, template } = &self.predicate {
            if let Some(engine) = engine.upgrade() {
                engine.block_unyield(*template, Some(index), propagation);
            }
        }
    }

    fn handle(
        self: &Rc<Self>,
        value: &Value,
        index: usize,
        state: bool,
        origin: Origin,
        propagation: &mut Propagation,
    ) {
        match (state, origin) {
            (true, Origin::Fresh) => {
                self.slots.borrow_mut().insert(
                    index,
                    FilterSlot { value: value.clone(), flag: None },
                );
                self.evaluate(value, index, Origin::Fresh, propagation);
            }
            (false, Origin::Fresh) => {
                let included = {
                    let mut slots = self.slots.borrow_mut();
                    slots.remove(&index).map_or(false, |s| s.flag == Some(true))
                };
                if included {
                    let position = self.position(index);
                    self.output.splice_in(position, 1, Vec::new(), propagation);
                }
                self.retire(index, propagation);
            }
            (true, Origin::Replaced) => {
                if let Some(slot) = self.slots.borrow_mut().get_mut(&index) {
                    slot.value = value.clone();
                }
                self.evaluate(value, index, Origin::Replaced, propagation);
            }
            (false, Origin::Replaced) => {
                // The replacement's set follows; leave the slot pending.
                let was_included = {
                    let mut slots = self.slots.borrow_mut();
                    match slots.get_mut(&index) {
                        Some(slot) => {
                            let was = slot.flag == Some(true);
                            slot.flag = None;
                            was
                        }
                        None => false,
                    }
                };
                if was_included {
                    let position = self.position(index);
                    self.output.splice_in(position, 1, Vec::new(), propagation);
                }
            }
            (false, Origin::Moved(to)) => {
                if let Some(slot) = self.slots.borrow_mut().remove(&index) {
                    self.carry.borrow_mut().insert(to, slot);
                }
            }
            (true, Origin::Moved(from)) => {
                if let Some(slot) = self.carry.borrow_mut().remove(&index) {
                    self.slots.borrow_mut().insert(index, slot);
                }
                // Re-key the block instance and rebind its index local.
                if let Predicate::Block { engine, template } = &self.predicate {
                    if let Some(engine) = engine.upgrade() {
                        engine.block_yield(
                            *template,
                            &[value.clone(), Value::from(index)],
                            Some(index),
                            Origin::Moved(from),
                            self.yielder.clone(),
                            propagation,
                        );
                    }
                }
            }
        }
    }

    /// A predicate result arrived for a source index.
    fn resolve(self: &Rc<Self>, index: usize, passing: bool, propagation: &mut Propagation) {
        let transition = {
            let mut slots = self.slots.borrow_mut();
            match slots.get_mut(&index) {
                Some(slot) => {
                    let previous = slot.flag;
                    slot.flag = Some(passing);
                    Some((previous, slot.value.clone()))
                }
                None => None,
            }
        };
        let (previous, value) = match transition {
            Some(t) => t,
            None => return,
        };
        trace!(index, passing, "filter result");
        match (previous, passing) {
            (Some(true), false) => {
                let position = self.position(index);
                self.output.splice_in(position, 1, Vec::new(), propagation);
            }
            (None, true) | (Some(false), true) => {
                let position = self.position(index);
                self.output.splice_in(position, 0, vec![value], propagation);
            }
            _ => {}
        }
    }
}

impl LiveFilter {
    pub fn new(source: &Seq, predicate: Predicate) -> Self {
        let core = Rc::new_cyclic(|weak: &Weak<FilterCore>| {
            let weak = weak.clone();
            FilterCore {
                output: Seq::new(),
                predicate,
                slots: RefCell::new(BTreeMap::new()),
                carry: RefCell::new(HashMap::new()),
                yielder: Rc::new(move |result: Option<&Value>, key, propagation| {
                    let core = match weak.upgrade() {
                        Some(core) => core,
                        None => return,
                    };
                    if let Some(index) = key {
                        let passing = result.map_or(false, Value::truthy);
                        core.resolve(index, passing, propagation);
                    }
                }),
            }
        });
        let handler = core.clone();
        let watcher: IndexSubscriber = Rc::new(move |value, index, state, origin, propagation| {
            handler.handle(value, index, state, origin, propagation);
        });
        source.watch(watcher.clone());
        Self { source: source.clone(), core, watcher }
    }

    /// The filtered sequence, live until `detach`.
    pub fn output(&self) -> Seq {
        self.core.output.clone()
    }

    /// Stop following the source. Retracts every element, which empties
    /// the output and retires block instances.
    pub fn detach(&self) {
        self.source.unwatch(&self.watcher);
    }
}

// ----------------------------------------------------------------------------
// Map
// ----------------------------------------------------------------------------

struct MapCore {
    output: Seq,
    mapper: Mapper,
    slots: RefCell<BTreeMap<usize, ()>>,
    carry: RefCell<HashMap<usize, ()>>,
    yielder: crate::graph::Yielder,
}

/// A live 1:1 mapping over an ordered store.
pub struct LiveMap {
    source: Seq,
    core: Rc<MapCore>,
    watcher: IndexSubscriber,
}

impl MapCore {
    fn position(&self, index: usize) -> usize {
        self.slots.borrow().range(..index).count()
    }

    fn evaluate(self: &Rc<Self>, value: &Value, index: usize, origin: Origin, propagation: &mut Propagation) {
        match &self.mapper {
            Mapper::Native(f) => {
                let mapped = f(value, index).unwrap_or(Value::Null);
                self.resolve(index, mapped, propagation);
            }
            Mapper::Block { engine, template } => {
                if let Some(engine) = engine.upgrade() {
                    engine.block_yield(
                        *template,
                        &[value.clone(), Value::from(index)],
                        Some(index),
                        origin,
                        self.yielder.clone(),
                        propagation,
                    );
                }
            }
        }
    }

    fn handle(
        self: &Rc<Self>,
        value: &Value,
        index: usize,
        state: bool,
        origin: Origin,
        propagation: &mut Propagation,
    ) {
        match (state, origin) {
            (true, Origin::Fresh) => {
                self.slots.borrow_mut().insert(index, ());
                let position = self.position(index);
                // Keep 1:1 alignment while a block result is pending.
                self.output.splice_in(position, 0, vec![Value::Null], propagation);
                self.evaluate(value, index, Origin::Fresh, propagation);
            }
            (false, Origin::Fresh) => {
                let position = self.position(index);
                if self.slots.borrow_mut().remove(&index).is_some() {
                    self.output.splice_in(position, 1, Vec::new(), propagation);
                    if let Mapper::Block { engine, template } = &self.mapper {
                        if let Some(engine) = engine.upgrade() {
                            engine.block_unyield(*template, Some(index), propagation);
                        }
                    }
                }
            }
            (true, Origin::Replaced) => {
                self.evaluate(value, index, Origin::Replaced, propagation);
            }
            (false, Origin::Replaced) => {}
            (false, Origin::Moved(to)) => {
                if self.slots.borrow_mut().remove(&index).is_some() {
                    self.carry.borrow_mut().insert(to, ());
                }
            }
            (true, Origin::Moved(from)) => {
                if self.carry.borrow_mut().remove(&index).is_some() {
                    self.slots.borrow_mut().insert(index, ());
                }
                // The mapped value may depend on the index; re-evaluate.
                self.evaluate(value, index, Origin::Moved(from), propagation);
            }
        }
    }

    fn resolve(self: &Rc<Self>, index: usize, mapped: Value, propagation: &mut Propagation) {
        if !self.slots.borrow().contains_key(&index) {
            return;
        }
        let position = self.position(index);
        if self.output.get(position).as_ref() != Some(&mapped) {
            self.output.splice_in(position, 1, vec![mapped], propagation);
        }
    }
}

impl LiveMap {
    pub fn new(source: &Seq, mapper: Mapper) -> Self {
        let core = Rc::new_cyclic(|weak: &Weak<MapCore>| {
            let weak = weak.clone();
            MapCore {
                output: Seq::new(),
                mapper,
                slots: RefCell::new(BTreeMap::new()),
                carry: RefCell::new(HashMap::new()),
                yielder: Rc::new(move |result: Option<&Value>, key, propagation| {
                    let core = match weak.upgrade() {
                        Some(core) => core,
                        None => return,
                    };
                    if let Some(index) = key {
                        let mapped = result.cloned().unwrap_or(Value::Null);
                        core.resolve(index, mapped, propagation);
                    }
                }),
            }
        });
        let handler = core.clone();
        let watcher: IndexSubscriber = Rc::new(move |value, index, state, origin, propagation| {
            handler.handle(value, index, state, origin, propagation);
        });
        source.watch(watcher.clone());
        Self { source: source.clone(), core, watcher }
    }

    pub fn output(&self) -> Seq {
        self.core.output.clone()
    }

    pub fn detach(&self) {
        self.source.unwatch(&self.watcher);
    }
}

// ----------------------------------------------------------------------------
// Sort
// ----------------------------------------------------------------------------

struct SortCore {
    output: Seq,
    comparator: Comparator,
    /// Source index to output position.
    placed: RefCell<BTreeMap<usize, usize>>,
    carry: RefCell<HashMap<usize, usize>>,
}

/// A live sorted view over an ordered store.
pub struct LiveSort {
    source: Seq,
    core: Rc<SortCore>,
    watcher: IndexSubscriber,
}

impl SortCore {
    fn insertion_point(&self, value: &Value) -> usize {
        let items = self.output.to_vec();
        let mut position = 0;
        // Stable: equal elements insert after existing ones.
        while position < items.len()
            && (self.comparator)(&items[position], value) != Ordering::Greater
        {
            position += 1;
        }
        position
    }

    fn insert(&self, index: usize, value: &Value, propagation: &mut Propagation) {
        let position = self.insertion_point(value);
        {
            let mut placed = self.placed.borrow_mut();
            for (_, p) in placed.iter_mut() {
                if *p >= position {
                    *p += 1;
                }
            }
            placed.insert(index, position);
        }
        self.output.splice_in(position, 0, vec![value.clone()], propagation);
    }

    fn remove(&self, index: usize, propagation: &mut Propagation) {
        let position = {
            let mut placed = self.placed.borrow_mut();
            let position = match placed.remove(&index) {
                Some(position) => position,
                None => return,
            };
            for (_, p) in placed.iter_mut() {
                if *p > position {
                    *p -= 1;
                }
            }
            position
        };
        self.output.splice_in(position, 1, Vec::new(), propagation);
    }

    fn handle(
        &self,
        value: &Value,
        index: usize,
        state: bool,
        origin: Origin,
        propagation: &mut Propagation,
    ) {
        match (state, origin) {
            (true, Origin::Fresh) => self.insert(index, value, propagation),
            (false, Origin::Fresh) => self.remove(index, propagation),
            (false, Origin::Replaced) => self.remove(index, propagation),
            (true, Origin::Replaced) => self.insert(index, value, propagation),
            (false, Origin::Moved(to)) => {
                if let Some(position) = self.placed.borrow_mut().remove(&index) {
                    self.carry.borrow_mut().insert(to, position);
                }
            }
            (true, Origin::Moved(_)) => {
                // A move never re-sorts: the element keeps its position.
                if let Some(position) = self.carry.borrow_mut().remove(&index) {
                    self.placed.borrow_mut().insert(index, position);
                }
            }
        }
    }
}

impl LiveSort {
    pub fn new(source: &Seq, comparator: Option<Comparator>) -> Self {
        let comparator =
            comparator.unwrap_or_else(|| Rc::new(|a: &Value, b: &Value| a.compare(b)));
        let core = Rc::new(SortCore {
            output: Seq::new(),
            comparator,
            placed: RefCell::new(BTreeMap::new()),
            carry: RefCell::new(HashMap::new()),
        });
        let handler = core.clone();
        let watcher: IndexSubscriber = Rc::new(move |value, index, state, origin, propagation| {
            handler.handle(value, index, state, origin, propagation);
        });
        source.watch(watcher.clone());
        Self { source: source.clone(), core, watcher }
    }

    pub fn output(&self) -> Seq {
        self.core.output.clone()
    }

    pub fn detach(&self) {
        self.source.unwatch(&self.watcher);
    }
}

impl Seq {
    /// A live sorted projection of this sequence. Defaults to value
    /// order when no comparator is given.
    pub fn sorted(&self, comparator: Option<Comparator>) -> LiveSort {
        LiveSort::new(self, comparator)
    }
}

// ----------------------------------------------------------------------------
// Every / Some
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum FlagMode {
    Every,
    Some,
}

struct FlagCore {
    mode: FlagMode,
    predicate: Predicate,
    slots: RefCell<BTreeMap<usize, Option<bool>>>,
    carry: RefCell<HashMap<usize, Option<bool>>>,
    current: RefCell<bool>,
    sink: Option<FlagSink>,
    yielder: crate::graph::Yielder,
}

/// A live boolean over an ordered store: every(p) or some(p).
pub struct LiveFlag {
    source: Seq,
    core: Rc<FlagCore>,
    watcher: IndexSubscriber,
}

impl FlagCore {
    fn compute(&self) -> bool {
        let slots = self.slots.borrow();
        match self.mode {
            // Every of an empty sequence is true; pending results count as
            // passing until they land.
            FlagMode::Every => !slots.values().any(|f| *f == Some(false)),
            FlagMode::Some => slots.values().any(|f| *f == Some(true)),
        }
    }

    fn refresh(&self, propagation: &mut Propagation) {
        let fresh = self.compute();
        let changed = {
            let mut current = self.current.borrow_mut();
            let changed = *current != fresh;
            *current = fresh;
            changed
        };
        if changed {
            trace!(value = fresh, "live flag flipped");
            if let Some(sink) = &self.sink {
                sink(fresh, propagation);
            }
        }
    }

    fn evaluate(self: &Rc<Self>, value: &Value, index: usize, origin: Origin, propagation: &mut Propagation) {
        match &self.predicate {
            Predicate::Native(f) => {
                let passing = f(value, index);
                self.resolve(index, passing, propagation);
            }
            Predicate::Block { engine, template } => {
                if let Some(engine) = engine.upgrade() {
                    engine.block_yield(
                        *template,
                        &[value.clone(), Value::from(index)],
                        Some(index),
                        origin,
                        self.yielder.clone(),
                        propagation,
                    );
                }
            }
        }
    }

    fn handle(
        self: &Rc<Self>,
        value: &Value,
        index: usize,
        state: bool,
        origin: Origin,
        propagation: &mut Propagation,
    ) {
        match (state, origin) {
            (true, Origin::Fresh) | (true, Origin::Replaced) => {
                self.slots.borrow_mut().insert(index, None);
                self.evaluate(value, index, origin, propagation);
            }
            (false, Origin::Fresh) => {
                self.slots.borrow_mut().remove(&index);
                if let Predicate::Block { engine, template } = &self.predicate {
                    if let Some(engine) = engine.upgrade() {
                        engine.block_unyield(*template, Some(index), propagation);
                    }
                }
                self.refresh(propagation);
            }
            (false, Origin::Replaced) => {}
            (false, Origin::Moved(to)) => {
                if let Some(flag) = self.slots.borrow_mut().remove(&index) {
                    self.carry.borrow_mut().insert(to, flag);
                }
            }
            (true, Origin::Moved(_)) => {
                if let Some(flag) = self.carry.borrow_mut().remove(&index) {
                    self.slots.borrow_mut().insert(index, flag);
                }
            }
        }
    }

    fn resolve(self: &Rc<Self>, index: usize, passing: bool, propagation: &mut Propagation) {
        {
            let mut slots = self.slots.borrow_mut();
            match slots.get_mut(&index) {
                Some(flag) => *flag = Some(passing),
                None => return,
            }
        }
        self.refresh(propagation);
    }
}

impl LiveFlag {
    pub fn every(source: &Seq, predicate: Predicate, sink: Option<FlagSink>) -> Self {
        Self::with_mode(source, predicate, sink, FlagMode::Every)
    }

    pub fn some(source: &Seq, predicate: Predicate, sink: Option<FlagSink>) -> Self {
        Self::with_mode(source, predicate, sink, FlagMode::Some)
    }

    fn with_mode(
        source: &Seq,
        predicate: Predicate,
        sink: Option<FlagSink>,
        mode: FlagMode,
    ) -> Self {
        let core = Rc::new_cyclic(|weak: &Weak<FlagCore>| {
            let weak = weak.clone();
            FlagCore {
                mode,
                predicate,
                slots: RefCell::new(BTreeMap::new()),
                carry: RefCell::new(HashMap::new()),
                current: RefCell::new(mode == FlagMode::Every),
                sink,
                yielder: Rc::new(move |result: Option<&Value>, key, propagation| {
                    let core = match weak.upgrade() {
                        Some(core) => core,
                        None => return,
                    };
                    if let Some(index) = key {
                        let passing = result.map_or(false, Value::truthy);
                        core.resolve(index, passing, propagation);
                    }
                }),
            }
        });
        let handler = core.clone();
        let watcher: IndexSubscriber = Rc::new(move |value, index, state, origin, propagation| {
            handler.handle(value, index, state, origin, propagation);
        });
        source.watch(watcher.clone());
        Self { source: source.clone(), core, watcher }
    }

    /// The current boolean.
    pub fn current(&self) -> bool {
        *self.core.current.borrow()
    }

    pub fn detach(&self) {
        self.source.unwatch(&self.watcher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(seq: &Seq) -> Vec<f64> {
        seq.to_vec()
            .into_iter()
            .map(|v| match v {
                Value::Number(n) => n,
                other => panic!("expected number, got {:?}", other),
            })
            .collect()
    }

    fn even() -> Predicate {
        Predicate::Native(Rc::new(|v: &Value, _| {
            matches!(v, Value::Number(n) if (*n as i64) % 2 == 0)
        }))
    }

    #[test]
    fn filter_follows_pushes_and_removals() {
        let source = Seq::from_values((1..=5).map(|n| Value::from(n as f64)).collect());
        let filter = LiveFilter::new(&source, even());
        assert_eq!(numbers(&filter.output()), vec![2.0, 4.0]);

        source.push(6.0);
        assert_eq!(numbers(&filter.output()), vec![2.0, 4.0, 6.0]);

        source.unset(1); // removes 2
        assert_eq!(numbers(&filter.output()), vec![4.0, 6.0]);
    }

    #[test]
    fn filter_handles_replacement() {
        let source = Seq::from_values(vec![Value::from(1.0), Value::from(2.0)]);
        let filter = LiveFilter::new(&source, even());
        assert_eq!(numbers(&filter.output()), vec![2.0]);

        source.set(0, 4.0);
        assert_eq!(numbers(&filter.output()), vec![4.0, 2.0]);
        source.set(0, 3.0);
        assert_eq!(numbers(&filter.output()), vec![2.0]);
    }

    #[test]
    fn filter_equals_fresh_recompute_after_splices() {
        let source = Seq::from_values((1..=8).map(|n| Value::from(n as f64)).collect());
        let filter = LiveFilter::new(&source, even());

        source.splice(2, 3, vec![Value::from(10.0), Value::from(11.0)]);
        source.splice(0, 1, Vec::new());
        source.splice(3, 0, vec![Value::from(12.0), Value::from(13.0)]);
        source.set(0, 7.0);

        let expected: Vec<f64> = numbers(&source)
            .into_iter()
            .filter(|n| (*n as i64) % 2 == 0)
            .collect();
        assert_eq!(numbers(&filter.output()), expected);
    }

    #[test]
    fn filter_detach_empties_output() {
        let source = Seq::from_values(vec![Value::from(2.0), Value::from(4.0)]);
        let filter = LiveFilter::new(&source, even());
        assert_eq!(filter.output().len(), 2);
        filter.detach();
        assert_eq!(filter.output().len(), 0);
        source.push(6.0);
        assert_eq!(filter.output().len(), 0);
    }

    #[test]
    fn map_stays_aligned() {
        let source = Seq::from_values(vec![Value::from(1.0), Value::from(2.0)]);
        let map = LiveMap::new(
            &source,
            Mapper::Native(Rc::new(|v: &Value, _| v.as_number().map(|n| Value::from(n * 10.0)))),
        );
        assert_eq!(numbers(&map.output()), vec![10.0, 20.0]);

        source.splice(1, 0, vec![Value::from(5.0)]);
        assert_eq!(numbers(&map.output()), vec![10.0, 50.0, 20.0]);

        source.set(0, 3.0);
        assert_eq!(numbers(&map.output()), vec![30.0, 50.0, 20.0]);

        source.shift();
        assert_eq!(numbers(&map.output()), vec![50.0, 20.0]);
    }

    #[test]
    fn sort_maintains_order_without_resorting_moves() {
        let source = Seq::from_values(vec![Value::from(3.0), Value::from(1.0)]);
        let sort = LiveSort::new(&source, None);
        assert_eq!(numbers(&sort.output()), vec![1.0, 3.0]);

        source.push(2.0);
        assert_eq!(numbers(&sort.output()), vec![1.0, 2.0, 3.0]);

        // A shift moves the survivors; the sorted view just drops the 3.
        source.unset(0);
        assert_eq!(numbers(&sort.output()), vec![1.0, 2.0]);

        source.set(0, 9.0); // replaces the 1
        assert_eq!(numbers(&sort.output()), vec![2.0, 9.0]);
    }

    #[test]
    fn every_and_some_flip_live() {
        let source = Seq::from_values(vec![Value::from(2.0), Value::from(4.0)]);
        let every = LiveFlag::every(&source, even(), None);
        let some = LiveFlag::some(&source, even(), None);
        assert!(every.current());
        assert!(some.current());

        source.push(3.0);
        assert!(!every.current());
        assert!(some.current());

        source.splice(0, 2, Vec::new()); // leaves only the 3
        assert!(!every.current());
        assert!(!some.current());

        source.shift(); // empty again
        assert!(every.current());
        assert!(!some.current());
    }

    #[test]
    fn empty_sequence_defaults() {
        let source = Seq::new();
        let every = LiveFlag::every(&source, even(), None);
        let some = LiveFlag::some(&source, even(), None);
        assert!(every.current());
        assert!(!some.current());
    }
}
