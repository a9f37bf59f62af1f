//! Heuristics for reading the backend's envelope. The backend does not
//! guarantee a uniform shape, so these only look for configured field names.

use crate::config::MarkerConfig;
use serde_json::Value;

/// Null, "", [] and {} carry no result.
pub fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// A non-empty result field, or for arrays a non-empty first element.
pub fn has_result_signal(body: &Value, markers: &MarkerConfig) -> bool {
    match body {
        Value::Object(map) => markers
            .result_fields
            .iter()
            .any(|field| map.get(field).is_some_and(is_non_empty)),
        Value::Array(items) => items.first().is_some_and(is_non_empty),
        _ => false,
    }
}

/// A queue marker field is present and no result came with it.
pub fn is_queued(body: &Value, markers: &MarkerConfig) -> bool {
    let Value::Object(map) = body else {
        return false;
    };

    let marked = markers
        .queued_fields
        .iter()
        .any(|field| map.get(field).is_some_and(is_non_empty));

    marked && !has_result_signal(body, markers)
}

/// Correlation id announced by the backend, if it sent one as a string.
pub fn marker_handle<'a>(body: &'a Value, markers: &MarkerConfig) -> Option<&'a str> {
    markers
        .queued_fields
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}
