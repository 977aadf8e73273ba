//! Structural containment for notification payloads.
//!
//! A content filter is a partial payload: a message satisfies it when every
//! key/value pair of the filter appears somewhere in the message at the same
//! position. Arrays are compared as ordered subsequences.

use serde_json::{Number, Value};

/// Returns true if `expected` is structurally contained in `actual`.
///
/// - values of different JSON kinds never match (`null` is its own kind)
/// - arrays: every element of `expected`, in order, must match some later
///   element of `actual` (subsequence, not permutation)
/// - objects: every key of `expected` must exist in `actual` with a
///   contained value
/// - scalars: equality, numbers compared by value (`1` matches `1.0`)
pub fn is_contained_in(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(expected), Value::Array(actual)) => is_subsequence(expected, actual),
        (Value::Object(expected), Value::Object(actual)) => expected.iter().all(|(key, value)| {
            actual
                .get(key)
                .is_some_and(|candidate| is_contained_in(value, candidate))
        }),
        _ => false,
    }
}

/// Returns true if `payload` satisfies the optional content filter.
/// No filter accepts everything.
pub fn accepts(filter: Option<&Value>, payload: &Value) -> bool {
    filter.map_or(true, |expected| is_contained_in(expected, payload))
}

/// Two-pointer forward scan: each expected element consumes the first
/// remaining actual element that contains it.
fn is_subsequence(expected: &[Value], actual: &[Value]) -> bool {
    let mut remaining = actual.iter();
    expected
        .iter()
        .all(|wanted| remaining.any(|candidate| is_contained_in(wanted, candidate)))
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a == b;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
