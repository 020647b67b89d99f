use serde::Serialize;
use serde_json::Value;

/// Deepest nesting level kept in logged parameters
pub const MAX_LOG_DEPTH: usize = 3;

const OBJECT_MARKER: &str = "[Object]";
const ARRAY_MARKER: &str = "[Array]";
const UNSERIALIZABLE_MARKER: &str = "[Unserializable]";

/// Copy of `value` without nulls, with containers below `MAX_LOG_DEPTH`
/// replaced by a truncation marker
pub fn strip_nulls(value: &Value) -> Value {
    strip_at(value, 0).unwrap_or(Value::Null)
}

fn strip_at(value: &Value, level: usize) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(_) if level >= MAX_LOG_DEPTH => Some(Value::String(OBJECT_MARKER.into())),
        Value::Array(_) if level >= MAX_LOG_DEPTH => Some(Value::String(ARRAY_MARKER.into())),
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(key, v)| strip_at(v, level + 1).map(|v| (key.clone(), v)))
                .collect(),
        )),
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(|v| strip_at(v, level + 1)).collect(),
        )),
        other => Some(other.clone()),
    }
}

/// JSON projection of arbitrary data for logging
///
/// Data that cannot be represented as JSON becomes a marker string.
pub fn to_log_value<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(UNSERIALIZABLE_MARKER.into()))
}
