//! Operator Tables
//!
//! Binary operator semantics plus the small lookup tables the parser and
//! evaluator consult: precedence, selector combinators, short-circuit
//! evaluators, literal (unevaluated) argument positions, and the inverse
//! table for reversible calls.

use std::cmp::Ordering;

use crate::value::Value;

/// Precedence: lower binds tighter. `=` is the loosest.
pub fn precedence(name: &str) -> Option<u32> {
    Some(match name {
        "*" | "/" | "%" => 1,
        "+" | "-" => 2,
        ">" | "<" => 3,
        "^" | "&" | "|" | "==" | "===" | "!=" | "!==" | ">=" | "<=" => 4,
        "&&" | "||" => 5,
        "=" => 10,
        _ => return None,
    })
}

/// Precedence assumed for operator runs outside the table, so unknown
/// operators still assemble into calls and resolve (or soft-fail) at
/// runtime.
pub const DEFAULT_PRECEDENCE: u32 = 6;

/// Selector combinators. A leading one of these switches the expression
/// into selector mode instead of raising a missing-operand error.
pub fn is_combinator(text: &str) -> bool {
    matches!(
        text,
        "+" | ">" | "!+" | "++" | "!~" | "~~" | "&" | "&&" | "$" | "$$"
    )
}

/// What a short-circuit evaluator decided after seeing one operand.
#[derive(Debug, PartialEq)]
pub enum Verdict {
    Continue,
    /// Stop evaluating; the call's result is the carried value.
    Stop(Option<Value>),
}

/// Per-operand evaluator for `,`, `&&` and `||`.
pub type Evaluator = fn(Option<&Value>, bool) -> Verdict;

pub fn evaluator(name: &str) -> Option<Evaluator> {
    match name {
        "," => Some(comma_evaluator),
        "&&" => Some(and_evaluator),
        "||" => Some(or_evaluator),
        _ => None,
    }
}

// A comma sequence stops silently when an operand produces nothing.
fn comma_evaluator(value: Option<&Value>, _last: bool) -> Verdict {
    match value {
        None | Some(Value::Null) => Verdict::Stop(None),
        Some(_) => Verdict::Continue,
    }
}

fn and_evaluator(value: Option<&Value>, _last: bool) -> Verdict {
    match value {
        Some(v) if v.truthy() => Verdict::Continue,
        other => Verdict::Stop(other.cloned()),
    }
}

fn or_evaluator(value: Option<&Value>, last: bool) -> Verdict {
    match value {
        Some(v) if v.truthy() => Verdict::Stop(Some(v.clone())),
        other => {
            if last {
                Verdict::Stop(other.cloned())
            } else {
                Verdict::Continue
            }
        }
    }
}

/// Argument positions that take the raw variable name instead of its
/// value. Assignment names its target; it does not read it.
pub fn literal_argument(name: &str) -> Option<usize> {
    match name {
        "=" | "define" | "undefine" => Some(0),
        _ => None,
    }
}

/// The call that undoes a reversible call with the same arguments.
pub fn inverse(name: &str) -> Option<&'static str> {
    match name {
        "=" | "define" => Some("undefine"),
        "undefine" => Some("define"),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Binary semantics
// ----------------------------------------------------------------------------

/// Apply a binary operator to settled operands. Unknown names return
/// None so resolution can fall through to helpers and methods.
pub fn apply(name: &str, left: &Value, right: &Value) -> Option<Value> {
    Some(match name {
        "+" => add(left, right),
        "-" => arithmetic(left, right, |a, b| a - b),
        "*" => arithmetic(left, right, |a, b| a * b),
        "/" => arithmetic(left, right, |a, b| a / b),
        "%" => arithmetic(left, right, |a, b| a % b),
        "^" => bitwise(left, right, |a, b| a ^ b),
        "&" => bitwise(left, right, |a, b| a & b),
        "|" => bitwise(left, right, |a, b| a | b),
        ">" => Value::Bool(order(left, right) == Ordering::Greater),
        "<" => Value::Bool(order(left, right) == Ordering::Less),
        ">=" => Value::Bool(order(left, right) != Ordering::Less),
        "<=" => Value::Bool(order(left, right) != Ordering::Greater),
        "==" => Value::Bool(left.loose_eq(right)),
        "!=" => Value::Bool(!left.loose_eq(right)),
        "===" => Value::Bool(left == right),
        "!==" => Value::Bool(left != right),
        "&&" => {
            if left.truthy() {
                right.clone()
            } else {
                left.clone()
            }
        }
        "||" => {
            if left.truthy() {
                left.clone()
            } else {
                right.clone()
            }
        }
        _ => return None,
    })
}

// Numeric addition when both sides are number-like, string
// concatenation otherwise.
fn add(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Value::from(format!("{}{}", left, right))
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => Value::Number(a + b),
            _ => Value::from(format!("{}{}", left, right)),
        },
    }
}

fn arithmetic(left: &Value, right: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    let a = left.as_number().unwrap_or(f64::NAN);
    let b = right.as_number().unwrap_or(f64::NAN);
    Value::Number(f(a, b))
}

fn bitwise(left: &Value, right: &Value, f: impl Fn(i64, i64) -> i64) -> Value {
    let a = left.as_number().unwrap_or(0.0) as i64;
    let b = right.as_number().unwrap_or(0.0) as i64;
    Value::Number(f(a, b) as f64)
}

// Numbers compare numerically when both sides coerce; everything else
// falls back to string order.
fn order(left: &Value, right: &Value) -> Ordering {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => left.to_string().cmp(&right.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_table() {
        assert_eq!(precedence("*"), Some(1));
        assert_eq!(precedence("+"), Some(2));
        assert_eq!(precedence("=="), Some(4));
        assert_eq!(precedence("="), Some(10));
        assert_eq!(precedence("?!"), None);
    }

    #[test]
    fn arithmetic_and_concat() {
        assert_eq!(
            apply("+", &Value::from(2.0), &Value::from(3.0)),
            Some(Value::from(5.0))
        );
        assert_eq!(
            apply("+", &Value::from("a"), &Value::from(1.0)),
            Some(Value::from("a1"))
        );
        assert_eq!(
            apply("%", &Value::from(7.0), &Value::from(4.0)),
            Some(Value::from(3.0))
        );
        assert_eq!(
            apply("^", &Value::from(6.0), &Value::from(3.0)),
            Some(Value::from(5.0))
        );
    }

    #[test]
    fn loose_and_strict_equality() {
        assert_eq!(
            apply("==", &Value::from(1.0), &Value::from("1")),
            Some(Value::Bool(true))
        );
        assert_eq!(
            apply("===", &Value::from(1.0), &Value::from("1")),
            Some(Value::Bool(false))
        );
    }

    #[test]
    fn comma_stops_on_absence() {
        assert_eq!(comma_evaluator(None, false), Verdict::Stop(None));
        assert_eq!(comma_evaluator(Some(&Value::Null), false), Verdict::Stop(None));
        assert_eq!(comma_evaluator(Some(&Value::from(1.0)), false), Verdict::Continue);
    }

    #[test]
    fn logic_evaluators_short_circuit() {
        assert_eq!(and_evaluator(Some(&Value::from(1.0)), false), Verdict::Continue);
        assert_eq!(
            and_evaluator(Some(&Value::from(0.0)), false),
            Verdict::Stop(Some(Value::from(0.0)))
        );
        assert_eq!(
            or_evaluator(Some(&Value::from(1.0)), false),
            Verdict::Stop(Some(Value::from(1.0)))
        );
        assert_eq!(or_evaluator(Some(&Value::from(0.0)), false), Verdict::Continue);
        assert_eq!(
            or_evaluator(Some(&Value::from(0.0)), true),
            Verdict::Stop(Some(Value::from(0.0)))
        );
    }
}
