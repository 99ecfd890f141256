//! Operator semantics over JSON values.
//!
//! Numbers and numeric strings compare numerically, everything else compares
//! as strings. Any ordering comparison with `null` on either side is `false`.

use serde_json::Value;
use std::cmp::Ordering;

use crate::error::ConditionError;

/// `null`, `false`, `0` and the string `"false"` are falsy. Everything else,
/// including the empty string and empty collections, is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => s != "false",
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric view of a value: numbers, numeric strings and booleans.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Converts an arithmetic result back into JSON, keeping integers integral.
pub fn from_f64(n: f64) -> Result<Value, ConditionError> {
    if !n.is_finite() {
        return Err(ConditionError::Evaluation(format!(
            "arithmetic produced {}",
            n
        )));
    }
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Ok(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ConditionError::Evaluation(format!("cannot represent {}", n)))
}

/// `==` with numeric coercion between numbers and numeric strings.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_number(left), as_number(right)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Orders two values, or `None` when either is null.
pub fn compare(left: &Value, right: &Value) -> Result<Option<Ordering>, ConditionError> {
    if left.is_null() || right.is_null() {
        return Ok(None);
    }

    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        if !(left.is_string() && right.is_string()) {
            return Ok(a.partial_cmp(&b));
        }
    }

    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        (Value::String(a), Value::Number(b)) => Ok(Some(a.as_str().cmp(b.to_string().as_str()))),
        (Value::Number(a), Value::String(b)) => Ok(Some(a.to_string().as_str().cmp(b.as_str()))),
        _ => Err(ConditionError::Evaluation(format!(
            "cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

/// `needle in haystack`: array membership, substring, or object key.
pub fn contains(needle: &Value, haystack: &Value) -> Result<bool, ConditionError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(needle, item))),
        Value::String(text) => Ok(text.contains(display(needle).as_str())),
        Value::Object(map) => Ok(map.contains_key(display(needle).as_str())),
        Value::Null => Ok(false),
        other => Err(ConditionError::Evaluation(format!(
            "'in' expects an array, string or object, found {}",
            type_name(other)
        ))),
    }
}

/// `+`: numeric addition, or concatenation when either side is a
/// non-numeric string.
pub fn add(left: &Value, right: &Value) -> Result<Value, ConditionError> {
    let numeric = |v: &Value| matches!(v, Value::Number(_) | Value::Bool(_) | Value::Null);
    if numeric(left) && numeric(right) {
        let a = as_number(left).unwrap_or(0.0);
        let b = as_number(right).unwrap_or(0.0);
        return from_f64(a + b);
    }
    if left.is_string() || right.is_string() {
        return Ok(Value::String(format!("{}{}", display(left), display(right))));
    }
    Err(ConditionError::Evaluation(format!(
        "cannot add {} and {}",
        type_name(left),
        type_name(right)
    )))
}

/// `-`, `*`, `/`, `%` over numeric operands.
pub fn arithmetic(op: char, left: &Value, right: &Value) -> Result<Value, ConditionError> {
    let (a, b) = match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ConditionError::Evaluation(format!(
                "'{}' expects numbers, found {} and {}",
                op,
                type_name(left),
                type_name(right)
            )))
        }
    };

    match op {
        '-' => from_f64(a - b),
        '*' => from_f64(a * b),
        '/' | '%' if b == 0.0 => Err(ConditionError::Evaluation("division by zero".to_string())),
        '/' => from_f64(a / b),
        '%' => from_f64(a % b),
        other => Err(ConditionError::Evaluation(format!(
            "unknown operator '{}'",
            other
        ))),
    }
}

/// Text form used for concatenation and substring tests. Strings are
/// rendered without quotes.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
