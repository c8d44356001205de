use grounding_keys::{KeyRegistry, Row, ROW_CONTAINER_HINT_KEY};
use serde_json::{Map, Value};

/// Sibling key that always carries the filtered rows of a dict payload.
pub const FILTERED_ROWS_KEY: &str = "stdout_rows_filtered";
pub const FILTERED_COUNT_KEY: &str = "_stdout_rows_filtered_count";
pub const FILTERED_TO_ZERO_KEY: &str = "_stdout_filtered_to_zero";

/// Row view of a payload.
///
/// A list yields its mapping items; a dict yields the mapping items of its row
/// container. Anything else has no rows.
#[must_use]
pub fn rows<'a>(registry: &KeyRegistry, payload: &'a Value) -> Vec<&'a Row> {
    match payload {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(obj) => registry
            .row_container_key(obj)
            .and_then(|key| obj.get(key))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[must_use]
pub fn owned_rows(registry: &KeyRegistry, payload: &Value) -> Vec<Row> {
    rows(registry, payload).into_iter().cloned().collect()
}

/// Rebuild `payload` around `filtered`, keeping its shape.
///
/// Lists become the filtered list. Dicts are copied with the container key replaced,
/// plus bookkeeping keys so later readers do not have to guess the shape again.
/// The input is never modified.
#[must_use]
pub fn replace_rows(
    payload: &Value,
    filtered: &[Row],
    container_key: Option<&str>,
    filtered_to_zero: bool,
) -> Value {
    let as_values = || -> Vec<Value> { filtered.iter().cloned().map(Value::Object).collect() };
    match payload {
        Value::Array(_) => Value::Array(as_values()),
        Value::Object(obj) => {
            let mut out: Map<String, Value> = obj.clone();
            out.insert(FILTERED_ROWS_KEY.to_string(), Value::Array(as_values()));
            if let Some(key) = container_key {
                out.insert(key.to_string(), Value::Array(as_values()));
                out.insert(
                    ROW_CONTAINER_HINT_KEY.to_string(),
                    Value::String(key.to_string()),
                );
            }
            out.insert(FILTERED_COUNT_KEY.to_string(), Value::from(filtered.len()));
            out.insert(FILTERED_TO_ZERO_KEY.to_string(), Value::Bool(filtered_to_zero));
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Outcome of filtering one payload: the untouched raw payload next to its
/// filtered rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPayload {
    pub raw: Value,
    pub filtered: Value,
    pub rows_before: usize,
    pub rows_after: usize,
    /// Raw rows existed and none survived
    pub filtered_to_zero: bool,
}

impl FilteredPayload {
    /// Rebuild `raw` around `kept`, the rows a transform let through.
    #[must_use]
    pub fn new(registry: &KeyRegistry, raw: Value, kept: &[Row]) -> Self {
        let rows_before = rows(registry, &raw).len();
        let filtered_to_zero = rows_before > 0 && kept.is_empty();
        let container_key = raw
            .as_object()
            .and_then(|obj| registry.row_container_key(obj))
            .map(str::to_string);
        let filtered = replace_rows(&raw, kept, container_key.as_deref(), filtered_to_zero);
        Self {
            raw,
            filtered,
            rows_before,
            rows_after: kept.len(),
            filtered_to_zero,
        }
    }
}

/// Whether a payload has been marked as filtered down to nothing.
#[must_use]
pub fn is_filtered_to_zero(payload: &Value) -> bool {
    payload
        .get(FILTERED_TO_ZERO_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// De-duplicated row paths in first-seen order.
#[must_use]
pub fn unique_paths<R: std::borrow::Borrow<Row>>(registry: &KeyRegistry, rows: &[R]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for row in rows {
        if let Some(path) = registry.row_path(row.borrow()) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use grounding_keys::DiscoveryPolicy;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> KeyRegistry {
        let mut registry = KeyRegistry::new(DiscoveryPolicy::lenient(), "test");
        registry.add(grounding_keys::KeyRole::Path, "file_path");
        registry
    }

    #[test]
    fn list_and_dict_payloads_yield_rows() {
        let registry = registry();
        let list = json!([{"file_path": "a.rs"}, 3, {"file_path": "b.rs"}]);
        assert_eq!(rows(&registry, &list).len(), 2);

        let dict = json!({"summary": "x", "results": [{"file_path": "a.rs"}]});
        assert_eq!(rows(&registry, &dict).len(), 1);

        assert!(rows(&registry, &json!("text")).is_empty());
        assert!(rows(&registry, &json!({"results": [1, 2]})).is_empty());
    }

    #[test]
    fn replace_rows_keeps_dict_shape() {
        let registry = registry();
        let payload = json!({"total": 2, "hits": [{"file_path": "a.rs"}, {"file_path": "b.rs"}]});
        let kept = vec![owned_rows(&registry, &payload).remove(1)];
        let out = replace_rows(&payload, &kept, Some("hits"), false);

        assert_eq!(out["total"], json!(2));
        assert_eq!(out["hits"], json!([{"file_path": "b.rs"}]));
        assert_eq!(out[FILTERED_ROWS_KEY], json!([{"file_path": "b.rs"}]));
        assert_eq!(out[ROW_CONTAINER_HINT_KEY], json!("hits"));
        assert_eq!(out[FILTERED_COUNT_KEY], json!(1));
        assert!(!is_filtered_to_zero(&out));
        // input untouched
        assert_eq!(payload["hits"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn replace_rows_marks_zero() {
        let payload = json!({"hits": [{"file_path": "a.rs"}]});
        let out = replace_rows(&payload, &[], Some("hits"), true);
        assert!(is_filtered_to_zero(&out));
        assert_eq!(replace_rows(&json!([1]), &[], None, true), json!([]));
    }

    #[test]
    fn filtered_payload_keeps_raw_beside_filtered() {
        let registry = registry();
        let raw = json!({"hits": [{"file_path": "src/a.rs"}, {"file_path": "tests/b.rs"}]});
        let kept = vec![owned_rows(&registry, &raw).remove(0)];

        let payload = FilteredPayload::new(&registry, raw.clone(), &kept);
        assert_eq!(payload.raw, raw);
        assert_eq!(payload.filtered["hits"], json!([{"file_path": "src/a.rs"}]));
        assert_eq!((payload.rows_before, payload.rows_after), (2, 1));
        assert!(!payload.filtered_to_zero);

        let emptied = FilteredPayload::new(&registry, raw, &[]);
        assert!(emptied.filtered_to_zero);
        assert!(is_filtered_to_zero(&emptied.filtered));
    }

    #[test]
    fn unique_paths_preserve_order() {
        let registry = registry();
        let payload = json!([
            {"file_path": "b.rs"},
            {"file_path": "a.rs"},
            {"file_path": "b.rs"},
            {"other": 1}
        ]);
        let rows = rows(&registry, &payload);
        assert_eq!(unique_paths(&registry, &rows), vec!["b.rs", "a.rs"]);
    }
}
