//! Dynamic Values
//!
//! Scripts, stores and helpers all traffic in one dynamic value type.
//! Absence ("no value at all") is represented by `Option<Value>` at API
//! boundaries, never by a sentinel variant: a missing variable produces
//! `None`, while an expression that evaluated to nothing produces
//! `Value::Null`.
//!
//! Stores, sequences, blocks and native functions are handles; they compare
//! by identity. Everything else compares structurally.

use std::fmt;
use std::rc::Rc;

use crate::graph::NodeId;
use crate::script::NativeFn;
use crate::store::{Seq, Store};

/// A dynamic value.
#[derive(Clone)]
pub enum Value {
    /// The null value. Present, but empty.
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    /// An immutable snapshot sequence (what a group store's key reads as).
    List(Rc<Vec<Value>>),
    /// A shared handle to a key-value store.
    Store(Store),
    /// A shared handle to an ordered store.
    Seq(Seq),
    /// A compiled block, passed around by handle and invoked by the engine.
    Block(NodeId),
    /// A native function usable as a scope method.
    Native(NativeFn),
}

impl Value {
    /// Script truthiness. Null is false, numbers are false when zero or
    /// NaN, strings are false when empty, handles are always true.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(_) | Value::Store(_) | Value::Seq(_) | Value::Block(_) => true,
            Value::Native(_) => true,
        }
    }

    /// Numeric coercion: numbers pass through, numeric strings parse,
    /// booleans become 0/1. Everything else refuses.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Borrow the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Loose equality: values of the same variant compare directly, a
    /// number and a numeric string compare numerically, and booleans
    /// coerce to numbers first.
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), Value::Number(_))
            | (Value::Number(_), Value::Bool(_))
            | (Value::Bool(_), Value::Str(_))
            | (Value::Str(_), Value::Bool(_)) => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            _ => false,
        }
    }

    /// Default sort order: numbers first (numerically), then strings
    /// (lexicographically), then everything else (unordered, equal).
    pub fn compare(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Number(_), _) => Ordering::Less,
            (_, Value::Number(_)) => Ordering::Greater,
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Str(_), _) => Ordering::Less,
            (_, Value::Str(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Store(a), Value::Store(b)) => a.addr() == b.addr(),
            (Value::Seq(a), Value::Seq(b)) => a.addr() == b.addr(),
            (Value::Block(a), Value::Block(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                // Integral numbers print without a trailing ".0".
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
            Value::Store(_) => write!(f, "[store]"),
            Value::Seq(_) => write!(f, "[seq]"),
            Value::Block(_) => write!(f, "[block]"),
            Value::Native(_) => write!(f, "[function]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Store(s) => write!(f, "Store(0x{:x})", s.addr()),
            Value::Seq(s) => write!(f, "Seq(0x{:x})", s.addr()),
            Value::Block(id) => write!(f, "Block({:?})", id),
            Value::Native(_) => write!(f, "Native"),
            other => write!(f, "{}", other),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Value {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Value {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }
}

impl From<Store> for Value {
    fn from(s: Store) -> Value {
        Value::Store(s)
    }
}

impl From<Seq> for Value {
    fn from(s: Seq) -> Value {
        Value::Seq(s)
    }
}
