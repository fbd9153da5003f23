//! Builtin Helpers
//!
//! The helper registry resolves call names that no scope method claimed:
//! collection counting, pluralization, operator passthroughs, and
//! primitive-coercing methods where the first argument converts to a
//! string, number or date and the rest forward as-is.
//!
//! Helpers receive the engine handle and the live propagation so the few
//! that mutate state can participate in the current settling. Most ignore
//! both. A helper returning None is a soft failure: the call produces no
//! value and propagation continues silently.

use std::rc::Rc;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use indexmap::IndexMap;

use super::operators;
use crate::graph::Engine;
use crate::store::Propagation;
use crate::value::Value;

/// A native helper: `(engine, args, propagation) -> result`.
pub type NativeFn = Rc<dyn Fn(&Engine, &[Value], &mut Propagation) -> Option<Value>>;

/// Helper registry in registration order.
pub type Helpers = IndexMap<String, NativeFn>;

macro_rules! helper {
    ($map:expr, $name:expr, $f:expr) => {
        $map.insert($name.to_string(), Rc::new($f) as NativeFn);
    };
}

/// The default registry every engine starts with.
pub fn default_helpers() -> Helpers {
    let mut map = Helpers::new();

    helper!(map, ",", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        args.last().cloned()
    });

    for op in [
        "+", "-", "*", "/", "%", "^", "&", "|", ">", "<", ">=", "<=", "==", "!=", "===",
        "!==", "&&", "||",
    ] {
        let name = op.to_string();
        map.insert(
            op.to_string(),
            Rc::new(move |_e: &Engine, args: &[Value], _p: &mut Propagation| {
                operators::apply(&name, args.first()?, args.get(1)?)
            }) as NativeFn,
        );
    }

    helper!(map, "count", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(count(args.first()?)))
    });

    helper!(map, "pluralize", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        let count = args.first()?.as_number()?;
        let singular = args.get(1)?.to_string();
        let plural = args.get(2).map(|v| v.to_string());
        let form = choose_form(count, &singular, plural.as_deref());
        Some(Value::from(substitute_count(&form, count)))
    });

    helper!(map, "pluralize_word", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        let count = args.first()?.as_number()?;
        let singular = args.get(1)?.to_string();
        let plural = args.get(2).map(|v| v.to_string());
        Some(Value::from(choose_form(count, &singular, plural.as_deref())))
    });

    register_string_helpers(&mut map);
    register_number_helpers(&mut map);
    register_date_helpers(&mut map);
    map
}

fn count(value: &Value) -> f64 {
    match value {
        Value::List(items) => items.len() as f64,
        Value::Seq(seq) => seq.len() as f64,
        Value::Store(store) => store.len() as f64,
        other => {
            if other.truthy() {
                1.0
            } else {
                0.0
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Pluralization
// ----------------------------------------------------------------------------

fn choose_form(count: f64, singular: &str, plural: Option<&str>) -> String {
    if count == 1.0 {
        singular.to_string()
    } else {
        match plural {
            Some(p) => p.to_string(),
            None => pluralize_phrase(singular),
        }
    }
}

/// Replace a `%` placeholder with the count, or prepend it.
fn substitute_count(form: &str, count: f64) -> String {
    let rendered = Value::Number(count).to_string();
    match form.find('%') {
        Some(index) => format!("{}{}{}", &form[..index], rendered, &form[index + 1..]),
        None => format!("{} {}", rendered, form),
    }
}

/// Pluralize the final word of a phrase.
fn pluralize_phrase(phrase: &str) -> String {
    match phrase.rfind(|c: char| c.is_whitespace()) {
        Some(i) => format!("{}{}", &phrase[..=i], inflect(&phrase[i + 1..])),
        None => inflect(phrase),
    }
}

// s/x/z/ch/sh take -es, consonant+y takes -ies, the rest take -s.
fn inflect(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{}es", word)
    } else if let Some(stem) = word.strip_suffix('y') {
        match stem.chars().last() {
            Some(c) if !"aeiouAEIOU".contains(c) => format!("{}ies", stem),
            _ => format!("{}s", word),
        }
    } else {
        format!("{}s", word)
    }
}

// ----------------------------------------------------------------------------
// String methods (first argument coerced to string)
// ----------------------------------------------------------------------------

fn register_string_helpers(map: &mut Helpers) {
    helper!(map, "uppercase", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::from(args.first()?.to_string().to_uppercase()))
    });
    helper!(map, "lowercase", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::from(args.first()?.to_string().to_lowercase()))
    });
    helper!(map, "trim", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::from(args.first()?.to_string().trim()))
    });
    helper!(map, "length", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(args.first()?.to_string().chars().count() as f64))
    });
    helper!(map, "split", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        let text = args.first()?.to_string();
        let parts = match args.get(1) {
            Some(sep) => {
                let sep = sep.to_string();
                text.split(&sep).map(Value::from).collect::<Vec<_>>()
            }
            None => vec![Value::from(text.as_str())],
        };
        Some(Value::from(parts))
    });
    helper!(map, "replace", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        let text = args.first()?.to_string();
        let from = args.get(1)?.to_string();
        let to = args.get(2)?.to_string();
        Some(Value::from(text.replacen(&from, &to, 1)))
    });
    helper!(map, "starts_with", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Bool(
            args.first()?.to_string().starts_with(&args.get(1)?.to_string()),
        ))
    });
    helper!(map, "ends_with", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Bool(
            args.first()?.to_string().ends_with(&args.get(1)?.to_string()),
        ))
    });
    helper!(map, "contains", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Bool(
            args.first()?.to_string().contains(&args.get(1)?.to_string()),
        ))
    });
    helper!(map, "substr", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        let text = args.first()?.to_string();
        let chars: Vec<char> = text.chars().collect();
        let start = args.get(1)?.as_number()? as i64;
        let start = if start < 0 {
            chars.len().saturating_sub(start.unsigned_abs() as usize)
        } else {
            (start as usize).min(chars.len())
        };
        let remaining = chars.len() - start;
        let take = match args.get(2).and_then(Value::as_number) {
            Some(len) if len >= 0.0 => (len as usize).min(remaining),
            Some(_) => 0,
            None => remaining,
        };
        Some(Value::from(
            chars[start..start + take].iter().collect::<String>(),
        ))
    });
    helper!(map, "join", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        let separator = args.get(1).map(|v| v.to_string()).unwrap_or_default();
        let rendered: Vec<String> = match args.first()? {
            Value::List(items) => items.iter().map(|v| v.to_string()).collect(),
            Value::Seq(seq) => seq.to_vec().iter().map(|v| v.to_string()).collect(),
            single => vec![single.to_string()],
        };
        Some(Value::from(rendered.join(&separator)))
    });
}

// ----------------------------------------------------------------------------
// Number methods (first argument coerced to number)
// ----------------------------------------------------------------------------

fn register_number_helpers(map: &mut Helpers) {
    helper!(map, "round", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(args.first()?.as_number()?.round()))
    });
    helper!(map, "floor", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(args.first()?.as_number()?.floor()))
    });
    helper!(map, "ceil", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(args.first()?.as_number()?.ceil()))
    });
    helper!(map, "abs", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(args.first()?.as_number()?.abs()))
    });
    helper!(map, "to_fixed", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        let value = args.first()?.as_number()?;
        let digits = args.get(1).and_then(Value::as_number).unwrap_or(0.0) as usize;
        Some(Value::from(format!("{:.*}", digits, value)))
    });
    helper!(map, "min", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        numeric_fold(args, f64::min)
    });
    helper!(map, "max", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        numeric_fold(args, f64::max)
    });
}

fn numeric_fold(args: &[Value], f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    let mut result: Option<f64> = None;
    for arg in args {
        let n = arg.as_number()?;
        result = Some(match result {
            Some(r) => f(r, n),
            None => n,
        });
    }
    result.map(Value::Number)
}

// ----------------------------------------------------------------------------
// Date methods (first argument coerced to a date)
// ----------------------------------------------------------------------------

fn register_date_helpers(map: &mut Helpers) {
    helper!(map, "year", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(coerce_date(args.first()?)?.year() as f64))
    });
    helper!(map, "month", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(coerce_date(args.first()?)?.month() as f64))
    });
    helper!(map, "day", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(coerce_date(args.first()?)?.day() as f64))
    });
    helper!(map, "weekday", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(
            coerce_date(args.first()?)?.weekday().num_days_from_sunday() as f64,
        ))
    });
    helper!(map, "hour", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(coerce_date(args.first()?)?.hour() as f64))
    });
    helper!(map, "minute", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(coerce_date(args.first()?)?.minute() as f64))
    });
    helper!(map, "timestamp", |_e: &Engine, args: &[Value], _p: &mut Propagation| {
        Some(Value::Number(coerce_date(args.first()?)?.timestamp() as f64))
    });
}

/// RFC 3339 or `YYYY-MM-DD` strings, or numeric epoch seconds.
fn coerce_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Str(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            let midnight = date.and_hms_opt(0, 0, 0)?;
            Some(Utc.from_utc_datetime(&midnight))
        }
        other => Utc.timestamp_opt(other.as_number()? as i64, 0).single(),
    }
}
