//! Change Propagation
//!
//! A `Propagation` carries the bookkeeping for one synchronous settling of
//! a change: which (store, key) pairs already notified their subscribers,
//! and which graph nodes still need a recompute.
//!
//! # How It Works
//!
//! 1. A public store mutation opens a `Propagation`, applies the change and
//!    notifies subscribers, handing them the propagation by reference.
//!
//! 2. Subscribers may write to other stores (or back to the same one) with
//!    the propagation they were handed; those writes notify inside the same
//!    propagation. A (store, key) pair notifies at most once per
//!    propagation, so write-back cycles terminate: later visible changes to
//!    an already-notified key apply silently.
//!
//! 3. Subscribers that feed the node graph do not recompute inline; they
//!    schedule their node. The queue drains in rank order (children before
//!    parents), each node at most once while queued, so a node whose inputs
//!    both changed recomputes once, after its inputs settled. A node may
//!    re-enter the queue if a child changes after its recompute.
//!
//! 4. When the outermost public call finishes notifying, it drains the
//!    queue until nothing is dirty, then returns.

use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

use tracing::trace;

/// Something the propagation queue can recompute. Implemented by graph
/// nodes; the store layer only knows this trait.
pub trait Dirty {
    /// Stable identity used to avoid double-queueing.
    fn ident(&self) -> u64;

    /// Height in the expression tree. Leaves are 0; a node's rank is above
    /// all of its children, so draining in ascending rank settles children
    /// first.
    fn rank(&self) -> u32;

    /// Recompute. Runs with the draining propagation, so further changes
    /// join the same settling.
    fn run(&self, propagation: &mut Propagation);
}

struct Queued {
    rank: u32,
    seq: u64,
    node: Rc<dyn Dirty>,
}

// BinaryHeap is a max-heap; invert the ordering so the lowest rank (and,
// within a rank, the earliest scheduled) pops first.
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for Queued {}

/// One synchronous settling of a change.
pub struct Propagation {
    /// (store address, key) pairs that already notified.
    notified: HashSet<(usize, Rc<str>)>,

    /// Nodes awaiting recompute, children first.
    queue: BinaryHeap<Queued>,

    /// Idents currently sitting in the queue.
    queued: HashSet<u64>,

    /// Monotonic tie-break for equal ranks.
    next_seq: u64,
}

impl Propagation {
    pub fn new() -> Self {
        Self {
            notified: HashSet::new(),
            queue: BinaryHeap::new(),
            queued: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Record that `(store, key)` is notifying. Returns false when the pair
    /// already notified in this propagation, in which case the caller must
    /// skip dispatch.
    pub(crate) fn enter(&mut self, store: usize, key: &str) -> bool {
        let fresh = self.notified.insert((store, Rc::from(key)));
        if !fresh {
            trace!(store = format_args!("0x{:x}", store), key, "notification suppressed");
        }
        fresh
    }

    /// Peek without recording. Bridges use this before forwarding into a
    /// target store, so a forwarding cycle stops at the bridge instead of
    /// half-applying.
    pub(crate) fn entered(&self, store: usize, key: &str) -> bool {
        self.notified.contains(&(store, Rc::from(key)))
    }

    /// Queue a node for recompute. A node already waiting is not queued
    /// twice; a node that already ran may enter again.
    pub fn schedule(&mut self, node: Rc<dyn Dirty>) {
        let ident = node.ident();
        if !self.queued.insert(ident) {
            return;
        }
        let rank = node.rank();
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(ident, rank, "node scheduled");
        self.queue.push(Queued { rank, seq, node });
    }

    /// Drain the queue until nothing is dirty. Recomputes may schedule
    /// further nodes; they join the same drain.
    pub fn drain(&mut self) {
        while let Some(entry) = self.queue.pop() {
            self.queued.remove(&entry.node.ident());
            trace!(ident = entry.node.ident(), rank = entry.rank, "node recompute");
            entry.node.run(self);
        }
    }
}

impl Default for Propagation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Probe {
        ident: u64,
        rank: u32,
        log: Rc<RefCell<Vec<u64>>>,
    }

    impl Dirty for Probe {
        fn ident(&self) -> u64 {
            self.ident
        }
        fn rank(&self) -> u32 {
            self.rank
        }
        fn run(&self, _propagation: &mut Propagation) {
            self.log.borrow_mut().push(self.ident);
        }
    }

    #[test]
    fn drains_in_rank_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut prop = Propagation::new();
        for (ident, rank) in [(1, 2), (2, 0), (3, 1)] {
            prop.schedule(Rc::new(Probe { ident, rank, log: log.clone() }));
        }
        prop.drain();
        assert_eq!(*log.borrow(), vec![2, 3, 1]);
    }

    #[test]
    fn queued_nodes_dedupe_until_run() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut prop = Propagation::new();
        let probe = Rc::new(Probe { ident: 7, rank: 0, log: log.clone() });
        prop.schedule(probe.clone());
        prop.schedule(probe.clone());
        prop.drain();
        assert_eq!(*log.borrow(), vec![7]);

        // After running, the node may enter again.
        prop.schedule(probe);
        prop.drain();
        assert_eq!(*log.borrow(), vec![7, 7]);
    }

    #[test]
    fn pairs_notify_once() {
        let mut prop = Propagation::new();
        assert!(prop.enter(0xbeef, "count"));
        assert!(!prop.enter(0xbeef, "count"));
        assert!(prop.enter(0xbeef, "other"));
        assert!(prop.entered(0xbeef, "count"));
        assert!(!prop.entered(0xdead, "count"));
    }

    #[test]
    fn equal_ranks_drain_in_schedule_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut prop = Propagation::new();
        for ident in [10, 11, 12] {
            prop.schedule(Rc::new(Probe { ident, rank: 3, log: log.clone() }));
        }
        prop.drain();
        assert_eq!(*log.borrow(), vec![10, 11, 12]);
    }
}
