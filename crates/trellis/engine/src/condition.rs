//! Transition predicate evaluation
//!
//! Pure functions deciding which transition a completed step takes.
//! Transitions are evaluated in declaration order and the first satisfied
//! guard wins; when none is satisfied the path has no successor and the
//! advancer treats it as normal path termination.

use serde_json::Value;
use std::cmp::Ordering;
use trellis_types::{Condition, Operator, Transition};

/// Resolve a dot-path against a JSON value. Objects are traversed by key,
/// arrays by numeric index; a missing segment resolves to nothing, never
/// an error.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluate one transition's guard against the triggering output.
pub fn evaluate(transition: &Transition, output: Option<&Value>) -> bool {
    match &transition.condition {
        Condition::Always => true,
        Condition::OnOutputValue {
            field,
            operator,
            value,
        } => {
            let resolved = output.and_then(|o| resolve_path(o, field));
            match operator {
                Operator::Eq => loose_eq(resolved.unwrap_or(&Value::Null), value),
                Operator::Ne => !loose_eq(resolved.unwrap_or(&Value::Null), value),
                Operator::Gt => compare(resolved, value) == Some(Ordering::Greater),
                Operator::Lt => compare(resolved, value) == Some(Ordering::Less),
                Operator::Ge => matches!(
                    compare(resolved, value),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                Operator::Le => matches!(
                    compare(resolved, value),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                Operator::Exists => resolved.is_some(),
                Operator::NotExists => resolved.is_none(),
                Operator::Contains => contains(resolved, value),
                Operator::NotContains => !contains(resolved, value),
            }
        }
    }
}

/// Pick the first transition whose guard is satisfied, in declaration
/// order. None means the path has no successor.
pub fn select_transition<'a>(
    transitions: &'a [Transition],
    output: Option<&Value>,
) -> Option<&'a Transition> {
    transitions.iter().find(|t| evaluate(t, output))
}

/// Numeric view of a value: JSON numbers, and strings that parse as one.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Loose equality: numeric coercion when both sides read as numbers,
/// structural equality otherwise.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordered comparison: numeric when both sides coerce, lexical when both
/// are strings, incomparable otherwise.
fn compare(resolved: Option<&Value>, value: &Value) -> Option<Ordering> {
    let resolved = resolved?;
    if let (Some(x), Some(y)) = (numeric(resolved), numeric(value)) {
        return x.partial_cmp(&y);
    }
    match (resolved, value) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Containment: substring for strings, loose-equality membership for
/// arrays; anything else does not contain.
fn contains(resolved: Option<&Value>, value: &Value) -> bool {
    match resolved {
        Some(Value::String(s)) => value.as_str().is_some_and(|needle| s.contains(needle)),
        Some(Value::Array(items)) => items.iter().any(|item| loose_eq(item, value)),
        _ => false,
    }
}
