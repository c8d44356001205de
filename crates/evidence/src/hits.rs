//! Whether a preflight payload carries anything worth citing.

use crate::rows::{is_filtered_to_zero, rows, FILTERED_ROWS_KEY};
use grounding_keys::classify::is_count_key_name;
use grounding_keys::{value_as_i64, KeyRegistry, KeyRole, Row};
use serde_json::Value;

const MAX_SUBSTANTIVE_DEPTH: usize = 4;

/// True when the payload holds at least one concrete hit.
///
/// A payload that was filtered to zero never has hits, whatever else it carries.
#[must_use]
pub fn has_hits(registry: &KeyRegistry, payload: &Value) -> bool {
    match payload {
        Value::Null => false,
        Value::String(text) => match parse_json_maybe(text) {
            Some(parsed) => has_hits(registry, &parsed),
            None => !text.trim().is_empty(),
        },
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => {
            if is_filtered_to_zero(payload) {
                return false;
            }
            if !rows(registry, payload).is_empty() {
                return true;
            }
            let positive = |value: &Value| value_as_i64(value).is_some_and(|n| n > 0);
            if registry
                .keys(KeyRole::HasHitsCount)
                .iter()
                .any(|key| obj.get(*key).is_some_and(positive))
            {
                return true;
            }
            if obj
                .iter()
                .any(|(key, value)| value.is_number() && is_count_key_name(key) && positive(value))
            {
                return true;
            }
            has_substantive_payload(obj, 0)
        }
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Weaker than [`has_hits`]: the payload is not blank.
#[must_use]
pub fn is_nonempty(registry: &KeyRegistry, payload: &Value) -> bool {
    match payload {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => {
            if !rows(registry, payload).is_empty() {
                return true;
            }
            !is_filtered_to_zero(payload) && !obj.is_empty()
        }
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Parse text as JSON when it is JSON; `null` counts as not parsed.
#[must_use]
pub fn parse_json_maybe(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|value| !value.is_null())
}

fn has_substantive_payload(obj: &Row, depth: usize) -> bool {
    if depth > MAX_SUBSTANTIVE_DEPTH {
        return false;
    }
    obj.iter().any(|(key, value)| {
        let key = key.trim();
        if key.starts_with('_') || key == FILTERED_ROWS_KEY {
            return false;
        }
        match value {
            Value::Array(items) => items.iter().any(|item| match item {
                Value::Object(inner) => has_substantive_payload(inner, depth + 1),
                other => is_substantive_scalar(other),
            }),
            Value::Object(inner) => has_substantive_payload(inner, depth + 1),
            other => is_substantive_scalar(other),
        }
    })
}

fn is_substantive_scalar(value: &Value) -> bool {
    match value {
        Value::String(text) => !text.trim().is_empty(),
        Value::Number(_) | Value::Bool(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grounding_keys::DiscoveryPolicy;
    use serde_json::json;

    fn registry() -> KeyRegistry {
        KeyRegistry::new(DiscoveryPolicy::lenient(), "test")
    }

    #[test]
    fn strings_and_lists() {
        let r = registry();
        assert!(has_hits(&r, &json!("some text")));
        assert!(!has_hits(&r, &json!("   ")));
        assert!(!has_hits(&r, &json!("[]")));
        assert!(has_hits(&r, &json!("[1]")));
        assert!(has_hits(&r, &json!("null")));
        assert!(!has_hits(&r, &json!([])));
        assert!(has_hits(&r, &json!([{"a": 1}])));
        assert!(!has_hits(&r, &Value::Null));
    }

    #[test]
    fn dict_counts_and_rows() {
        let r = registry();
        assert!(has_hits(&r, &json!({"results": [{"path": "a.rs"}]})));
        assert!(has_hits(&r, &json!({"match_count": 3})));
        assert!(has_hits(&r, &json!({"match_count": 0, "status": "ok"})));
        assert!(!has_hits(&r, &json!({"_match_count": 0, "_meta": "x"})));
    }

    #[test]
    fn configured_hit_count_keys_accept_numeric_strings() {
        let mut r = registry();
        r.add(KeyRole::HasHitsCount, "n");
        assert!(has_hits(&r, &json!({"n": "2", "_x": ""})));
    }

    #[test]
    fn filtered_to_zero_never_hits() {
        let r = registry();
        let payload = json!({"status": "ok", "hits": [], "_stdout_filtered_to_zero": true});
        assert!(!has_hits(&r, &payload));
        assert!(!is_nonempty(&r, &payload));
    }

    #[test]
    fn substantive_search_is_depth_bounded() {
        let r = registry();
        let deep = json!({"a": {"b": {"c": {"d": {"e": {"f": "leaf"}}}}}});
        assert!(!has_hits(&r, &deep));
        let shallow = json!({"a": {"b": {"c": "leaf"}}});
        assert!(has_hits(&r, &shallow));
        let side_channel = json!({"stdout_rows_filtered": ["x"], "_k": 1});
        assert!(!has_hits(&r, &side_channel));
    }

    #[test]
    fn nonempty_is_weaker_than_hits() {
        let r = registry();
        let payload = json!({"_meta": "only"});
        assert!(is_nonempty(&r, &payload));
        assert!(!has_hits(&r, &payload));
        assert!(!is_nonempty(&r, &json!({})));
    }
}
