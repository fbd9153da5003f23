//! End-to-end tests: scripts attached to scopes, recomputing against
//! store changes, with derived views and the block yield protocol.

use std::cell::RefCell;
use std::rc::Rc;

use weft_core::graph::{Engine, OutputSink, Yielder};
use weft_core::script::{Ast, Scope};
use weft_core::store::{Origin, Propagation, Seq, Store};
use weft_core::Value;

fn recording_sink(log: Rc<RefCell<Vec<Option<Value>>>>) -> OutputSink {
    Rc::new(move |value, _propagation| {
        log.borrow_mut().push(value.cloned());
    })
}

fn numbers(seq: &Seq) -> Vec<f64> {
    seq.to_vec()
        .into_iter()
        .map(|v| match v {
            Value::Number(n) => n,
            other => panic!("expected number, got {:?}", other),
        })
        .collect()
}

fn eval(source: &str, scope: &Scope) -> Option<Value> {
    Engine::new().evaluate(source, scope).expect("script evaluates")
}

#[test]
fn attach_tracks_changes() {
    let engine = Engine::new();
    let scope = Scope::new();
    scope.set("a", 1.0);
    scope.set("b", 2.0);

    let log = Rc::new(RefCell::new(Vec::new()));
    let handle = engine
        .attach("a + b * 2", &scope, Some(recording_sink(log.clone())))
        .unwrap();
    assert_eq!(*log.borrow(), vec![Some(Value::from(5.0))]);

    scope.set("b", 3.0);
    assert_eq!(log.borrow().last(), Some(&Some(Value::from(7.0))));

    // An equal write is silent all the way up.
    scope.set("b", 3.0);
    assert_eq!(log.borrow().len(), 2);

    engine.detach(&handle);
    scope.set("b", 9.0);
    assert_eq!(log.borrow().len(), 2);
}

/// One write that touches both leaves of a function recomputes the
/// function once, not once per leaf.
#[test]
fn single_recompute_per_write() {
    let engine = Engine::new();
    let scope = Scope::new();
    let first = Store::new();
    first.set("a", 1.0);
    first.set("b", 2.0);
    scope.set("p", first);

    let log = Rc::new(RefCell::new(Vec::new()));
    engine
        .attach("p.a + p.b", &scope, Some(recording_sink(log.clone())))
        .unwrap();
    assert_eq!(*log.borrow(), vec![Some(Value::from(3.0))]);

    let second = Store::new();
    second.set("a", 10.0);
    second.set("b", 20.0);
    scope.set("p", second);
    assert_eq!(
        *log.borrow(),
        vec![Some(Value::from(3.0)), Some(Value::from(30.0))]
    );
}

/// A diamond reading `x` on both sides recomputes once per write and
/// never emits a half-updated value.
#[test]
fn diamond_without_glitches() {
    let engine = Engine::new();
    let scope = Scope::new();
    scope.set("x", 1.0);

    let log = Rc::new(RefCell::new(Vec::new()));
    engine
        .attach("x + x * 2", &scope, Some(recording_sink(log.clone())))
        .unwrap();
    scope.set("x", 2.0);
    assert_eq!(
        *log.borrow(),
        vec![Some(Value::from(3.0)), Some(Value::from(6.0))]
    );
}

#[test]
fn precedence_through_evaluation() {
    let scope = Scope::new();
    assert_eq!(eval("2 + 3 * 4", &scope), Some(Value::from(14.0)));
    assert_eq!(eval("1 - 2 - 3", &scope), Some(Value::from(-4.0)));
    assert_eq!(eval("(1 + 2) * 3", &scope), Some(Value::from(9.0)));
    assert_eq!(eval("10 - 2 * 3", &scope), Some(Value::from(4.0)));
}

/// Expressions also compile directly from syntax trees, staying live
/// like attached source.
#[test]
fn compile_from_syntax() {
    let engine = Engine::new();
    let scope = Scope::new();
    scope.set("n", 4.0);

    let ast = Ast::call("*", vec![Ast::variable("n"), Ast::number(10.0)]);
    let handle = engine.compile(&ast, &scope, None).unwrap();
    assert_eq!(engine.result(&handle), Some(Value::from(40.0)));

    scope.set("n", 5.0);
    assert_eq!(engine.result(&handle), Some(Value::from(50.0)));
    engine.detach(&handle);
}

#[test]
fn comma_sequence_yields_last() {
    let scope = Scope::new();
    assert_eq!(eval("1 + 1, 2 * 3", &scope), Some(Value::from(6.0)));
}

#[test]
fn logic_short_circuits_before_the_right_side() {
    let scope = Scope::new();
    // `boom` never resolves; the left side settles it first.
    assert_eq!(eval("0 && boom()", &scope), Some(Value::from(0.0)));
    assert_eq!(eval("1 || boom()", &scope), Some(Value::from(1.0)));
    // An absent left operand suppresses the conjunction silently.
    assert_eq!(eval("missing && 1", &scope), None);
}

#[test]
fn pluralize_forms() {
    let scope = Scope::new();
    assert_eq!(
        eval("pluralize(1, 'beach')", &scope),
        Some(Value::from("1 beach"))
    );
    assert_eq!(
        eval("pluralize(2, 'beach')", &scope),
        Some(Value::from("2 beaches"))
    );
    assert_eq!(
        eval("pluralize(2, 'comment', 'beachiz (%)')", &scope),
        Some(Value::from("beachiz (2)"))
    );
}

#[test]
fn assignment_writes_and_detach_reverts() {
    let engine = Engine::new();
    let scope = Scope::new();
    scope.set("price", 3.0);
    scope.set("quantity", 4.0);

    let handle = engine.attach("total = price * quantity", &scope, None).unwrap();
    assert_eq!(scope.get("total"), Some(Value::from(12.0)));

    // The assignment is live: its layer replaces in place.
    scope.set("price", 5.0);
    assert_eq!(scope.get("total"), Some(Value::from(20.0)));

    engine.detach(&handle);
    assert_eq!(scope.get("total"), None);
}

#[test]
fn undefine_removes_and_detach_restores() {
    let engine = Engine::new();
    let scope = Scope::new();
    scope.set("x", 5.0);

    let handle = engine.attach("undefine(x)", &scope, None).unwrap();
    assert_eq!(scope.get("x"), None);

    engine.detach(&handle);
    assert_eq!(scope.get("x"), Some(Value::from(5.0)));
}

/// A branch producing nothing yields null, never absence; flipping the
/// condition swaps the live branch instance.
#[test]
fn conditional_follows_its_condition() {
    let engine = Engine::new();
    let scope = Scope::new();
    scope.set("logged_in", false);

    let log = Rc::new(RefCell::new(Vec::new()));
    engine
        .attach(
            "if(logged_in) { 'hello' }",
            &scope,
            Some(recording_sink(log.clone())),
        )
        .unwrap();
    assert_eq!(*log.borrow(), vec![Some(Value::Null)]);

    scope.set("logged_in", true);
    assert_eq!(log.borrow().last(), Some(&Some(Value::from("hello"))));

    scope.set("logged_in", false);
    assert_eq!(log.borrow().last(), Some(&Some(Value::Null)));
}

#[test]
fn unless_inverts() {
    let scope = Scope::new();
    scope.set("flag", false);
    assert_eq!(eval("unless(flag) { 'off' }", &scope), Some(Value::from("off")));
    scope.set("flag", true);
    assert_eq!(eval("unless(flag) { 'off' }", &scope), Some(Value::Null));
}

#[test]
fn count_stays_live_over_a_sequence() {
    let engine = Engine::new();
    let scope = Scope::new();
    let items = Seq::from_values(vec![Value::from(1.0), Value::from(2.0)]);
    scope.set("items", items.clone());

    let log = Rc::new(RefCell::new(Vec::new()));
    engine
        .attach("count(items)", &scope, Some(recording_sink(log.clone())))
        .unwrap();
    assert_eq!(log.borrow().last(), Some(&Some(Value::from(2.0))));

    items.push(3.0);
    assert_eq!(log.borrow().last(), Some(&Some(Value::from(3.0))));

    let _ = items.shift();
    let _ = items.shift();
    assert_eq!(log.borrow().last(), Some(&Some(Value::from(1.0))));
}

/// The splice law: removed slice comes back, the remainder re-seats,
/// and each changed final index fires exactly one set notification.
#[test]
fn splice_law() {
    let seq = Seq::from_values((1..=5).map(|n| Value::from(n as f64)).collect());
    let sets = Rc::new(RefCell::new(Vec::new()));
    let sets2 = sets.clone();
    seq.watch(Rc::new(move |_value, index, state, _origin, _prop| {
        if state {
            sets2.borrow_mut().push(index);
        }
    }));
    sets.borrow_mut().clear();

    let removed = seq.splice(1, 2, vec![Value::from(9.0)]);
    assert_eq!(removed, vec![Value::from(2.0), Value::from(3.0)]);
    assert_eq!(numbers(&seq), vec![1.0, 9.0, 4.0, 5.0]);

    let mut fired = sets.borrow().clone();
    fired.sort_unstable();
    assert_eq!(fired, vec![1, 2, 3]);
}

#[test]
fn live_filter_with_a_block_predicate() {
    let engine = Engine::new();
    let scope = Scope::new();
    let items = Seq::from_values((1..=6).map(|n| Value::from(n as f64)).collect());
    scope.set("items", items.clone());
    scope.set("limit", 3.0);

    let log = Rc::new(RefCell::new(Vec::new()));
    engine
        .attach(
            "items.filter { |x| x > limit }",
            &scope,
            Some(recording_sink(log.clone())),
        )
        .unwrap();
    let output = match log.borrow().first() {
        Some(Some(Value::Seq(seq))) => seq.clone(),
        other => panic!("expected a sequence, got {:?}", other),
    };
    assert_eq!(numbers(&output), vec![4.0, 5.0, 6.0]);

    // Structural edits keep the view aligned.
    items.push(10.0);
    assert_eq!(numbers(&output), vec![4.0, 5.0, 6.0, 10.0]);
    items.splice(0, 4, vec![Value::from(7.0)]);
    assert_eq!(numbers(&output), vec![7.0, 5.0, 6.0, 10.0]);

    // A scope change re-evaluates every live instance.
    scope.set("limit", 6.0);
    assert_eq!(numbers(&output), vec![7.0, 10.0]);

    // Final check against a fresh recompute of the same predicate.
    let expected: Vec<f64> = numbers(&items).into_iter().filter(|n| *n > 6.0).collect();
    assert_eq!(numbers(&output), expected);
}

#[test]
fn multiline_filter_matches_inline() {
    let engine = Engine::new();
    let scope = Scope::new();
    let items = Seq::from_values((1..=4).map(|n| Value::from(n as f64)).collect());
    scope.set("items", items);
    scope.set("limit", 2.0);

    let inline = engine
        .attach("items.filter { |x| x > limit }", &scope, None)
        .unwrap();
    let multiline = engine
        .attach("items.filter |x|\n  x > limit", &scope, None)
        .unwrap();
    for handle in [&inline, &multiline] {
        match engine.result(handle) {
            Some(Value::Seq(seq)) => assert_eq!(numbers(&seq), vec![3.0, 4.0]),
            other => panic!("expected a sequence, got {:?}", other),
        }
    }
}

#[test]
fn live_sort_and_every() {
    let engine = Engine::new();
    let scope = Scope::new();
    let items = Seq::from_values(vec![Value::from(3.0), Value::from(1.0), Value::from(2.0)]);
    scope.set("items", items.clone());

    let handle = engine.attach("items.sort()", &scope, None).unwrap();
    let sorted = match engine.result(&handle) {
        Some(Value::Seq(seq)) => seq,
        other => panic!("expected a sequence, got {:?}", other),
    };
    assert_eq!(numbers(&sorted), vec![1.0, 2.0, 3.0]);
    items.push(0.0);
    assert_eq!(numbers(&sorted), vec![0.0, 1.0, 2.0, 3.0]);

    let log = Rc::new(RefCell::new(Vec::new()));
    engine
        .attach(
            "items.every { |x| x < 10 }",
            &scope,
            Some(recording_sink(log.clone())),
        )
        .unwrap();
    assert_eq!(log.borrow().last(), Some(&Some(Value::Bool(true))));
    items.push(25.0);
    assert_eq!(log.borrow().last(), Some(&Some(Value::Bool(false))));
}

/// Views are also constructable directly from a block template handle.
#[test]
fn direct_view_constructors() {
    let engine = Engine::new();
    let scope = Scope::new();
    let handle = engine.attach("{ |x| x % 2 == 0 }", &scope, None).unwrap();
    let template = match engine.result(&handle) {
        Some(Value::Block(id)) => id,
        other => panic!("expected a block handle, got {:?}", other),
    };

    let items = Seq::from_values((1..=6).map(|n| Value::from(n as f64)).collect());
    let evens = engine.filter(&items, template);
    assert_eq!(numbers(&evens.output()), vec![2.0, 4.0, 6.0]);
    items.push(8.0);
    assert_eq!(numbers(&evens.output()), vec![2.0, 4.0, 6.0, 8.0]);

    let sorted = items.sorted(None);
    items.unshift(9.0);
    assert_eq!(
        numbers(&sorted.output()),
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 9.0]
    );

    evens.detach();
    assert!(evens.output().is_empty());
    sorted.detach();
}

/// Yielding at two keys keeps two instances live with independent
/// bindings; re-keying moves an instance without rebuilding it.
#[test]
fn yield_multiplexing() {
    let engine = Engine::new();
    let scope = Scope::new();
    let handle = engine.attach("{ |x| x * 10 }", &scope, None).unwrap();
    let template = match engine.result(&handle) {
        Some(Value::Block(id)) => id,
        other => panic!("expected a block handle, got {:?}", other),
    };

    let log: Rc<RefCell<Vec<(Option<usize>, Option<Value>)>>> = Rc::new(RefCell::new(Vec::new()));
    let yielder: Yielder = {
        let log = log.clone();
        Rc::new(move |value, key, _propagation| {
            log.borrow_mut().push((key, value.cloned()));
        })
    };
    let latest = |log: &Rc<RefCell<Vec<(Option<usize>, Option<Value>)>>>, key: usize| {
        log.borrow()
            .iter()
            .rev()
            .find(|(k, _)| *k == Some(key))
            .map(|(_, v)| v.clone())
            .expect("delivery for key")
    };

    let mut propagation = Propagation::new();
    engine.block_yield(
        template,
        &[Value::from(2.0)],
        Some(0),
        Origin::Fresh,
        yielder.clone(),
        &mut propagation,
    );
    engine.block_yield(
        template,
        &[Value::from(3.0)],
        Some(1),
        Origin::Fresh,
        yielder.clone(),
        &mut propagation,
    );
    propagation.drain();
    assert_eq!(latest(&log, 0), Some(Value::from(20.0)));
    assert_eq!(latest(&log, 1), Some(Value::from(30.0)));

    // Rebinding one key leaves the other instance untouched.
    let before = log.borrow().iter().filter(|(k, _)| *k == Some(1)).count();
    let mut propagation = Propagation::new();
    engine.block_yield(
        template,
        &[Value::from(4.0)],
        Some(0),
        Origin::Fresh,
        yielder.clone(),
        &mut propagation,
    );
    propagation.drain();
    assert_eq!(latest(&log, 0), Some(Value::from(40.0)));
    let after = log.borrow().iter().filter(|(k, _)| *k == Some(1)).count();
    assert_eq!(before, after);

    // A shifted caller re-keys the live instance.
    let mut propagation = Propagation::new();
    engine.block_yield(
        template,
        &[Value::from(3.0)],
        Some(5),
        Origin::Moved(1),
        yielder.clone(),
        &mut propagation,
    );
    propagation.drain();
    assert_eq!(latest(&log, 5), Some(Value::from(30.0)));

    // Unyielding one key leaves the other live.
    let mut propagation = Propagation::new();
    engine.block_unyield(template, Some(0), &mut propagation);
    engine.block_yield(
        template,
        &[Value::from(6.0)],
        Some(5),
        Origin::Fresh,
        yielder,
        &mut propagation,
    );
    propagation.drain();
    assert_eq!(latest(&log, 5), Some(Value::from(60.0)));
}

/// A subscriber writing back to the key that notified it settles in one
/// propagation instead of recursing.
#[test]
fn write_back_cycle_settles() {
    let scope = Scope::new();
    let variables = scope.variables();
    let handle = variables.clone();
    variables.subscribe(
        "n",
        Rc::new(move |new, _old, propagation| {
            if let Some(Value::Number(n)) = new {
                if *n < 50.0 {
                    handle.set_in("n", Value::from(n + 1.0), None, false, propagation);
                }
            }
        }),
        true,
    );
    scope.set("n", 1.0);
    assert_eq!(scope.get("n"), Some(Value::from(2.0)));
}
