//! Host ↔ script value conversion.
//!
//! `rhai`'s `serde` integration already implements exactly the mapping
//! needed here: JSON objects become script object maps, JSON arrays
//! become script arrays, and primitives/null map onto `Dynamic` directly.

use rhai::Dynamic;
use serde_json::Value;

/// Converts a host JSON value into a script value.
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

/// Converts a script value back into a host JSON value.
///
/// A value that doesn't round-trip (e.g. holds a function pointer) becomes
/// `Value::Null` rather than propagating a conversion error; callers that
/// need a guaranteed representable value are expected to build it from
/// host primitives in the first place.
pub fn dynamic_to_json(value: Dynamic) -> Value {
    rhai::serde::from_dynamic(&value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_round_trips_to_map_and_back() {
        let original: Value = serde_json::json!({"owner": "myorg", "number": 42, "ok": true});
        let dynamic = json_to_dynamic(&original);
        assert!(dynamic.is_map());
        assert_eq!(dynamic_to_json(dynamic), original);
    }

    #[test]
    fn array_round_trips_to_one_based_sequence_and_back() {
        let original: Value = serde_json::json!(["a", "b", "c"]);
        let dynamic = json_to_dynamic(&original);
        assert!(dynamic.is_array());
        assert_eq!(dynamic_to_json(dynamic), original);
    }

    #[test]
    fn null_round_trips() {
        let dynamic = json_to_dynamic(&Value::Null);
        assert_eq!(dynamic_to_json(dynamic), Value::Null);
    }
}
