use crate::error::{KeyError, Result};
use crate::role::{KeyRole, RoleKeys};
use serde_json::Value;

/// Hint lists accepted under `semantic_hints`, in seeding order.
const HINT_KEYS: &[(&str, KeyRole)] = &[
    ("path_keys", KeyRole::Path),
    ("line_keys", KeyRole::Line),
    ("snippet_keys", KeyRole::Snippet),
    ("row_container_keys", KeyRole::RowContainer),
    ("iter_rows_keys", KeyRole::RowContainer),
    ("count_keys", KeyRole::RowCount),
    ("row_count_keys", KeyRole::RowCount),
    ("has_hits_count_keys", KeyRole::HasHitsCount),
];

/// An engine's authoritative description of its output columns.
///
/// A contract only counts as loaded when it names at least one column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaContract {
    pub columns: Vec<String>,
    pub semantic_keys: RoleKeys,
    pub schema_version: Option<String>,
}

impl SchemaContract {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| KeyError::invalid_contract("contract must be a JSON object"))?;

        let mut contract = Self {
            columns: extract_columns(obj.get("columns")),
            ..Self::default()
        };

        if let Some(Value::Array(entries)) = obj.get("columns") {
            for entry in entries.iter().filter_map(Value::as_object) {
                let name = entry.get("name").and_then(Value::as_str).unwrap_or("").trim();
                if name.is_empty() {
                    continue;
                }
                let aliases = string_list(entry.get("aliases"));
                for raw_role in string_list(entry.get("semantic_roles")) {
                    for role in KeyRole::from_contract_role(&raw_role) {
                        contract.seed(*role, std::iter::once(name).chain(aliases.iter().map(String::as_str)));
                    }
                }
            }
        }

        if let Some(Value::Object(hints)) = obj.get("semantic_hints") {
            for (hint_key, role) in HINT_KEYS {
                let values = string_list(hints.get(*hint_key));
                contract.seed(*role, values.iter().map(String::as_str));
            }
            let count_keys = string_list(hints.get("count_keys"));
            contract.seed(KeyRole::HasHitsCount, count_keys.iter().map(String::as_str));
        }

        contract.schema_version = obj
            .get("metadata")
            .and_then(|m| m.get("schema_version"))
            .and_then(scalar_string)
            .filter(|v| !v.is_empty());

        Ok(contract)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        !self.columns.is_empty()
    }

    fn seed<'a>(&mut self, role: KeyRole, names: impl Iterator<Item = &'a str>) {
        for name in names {
            self.semantic_keys.push_unique(role, name, usize::MAX);
        }
    }
}

fn extract_columns(raw: Option<&Value>) -> Vec<String> {
    let names: Vec<String> = match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(entry) => entry.get("name").and_then(Value::as_str).map(str::to_string),
                Value::String(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };
    dedupe_trimmed(names)
}

fn string_list(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => {
            dedupe_trimmed(items.iter().filter_map(scalar_string).collect())
        }
        _ => Vec::new(),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn dedupe_trimmed(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim();
        if value.is_empty() || out.iter().any(|v| v == value) {
            continue;
        }
        out.push(value.to_string());
    }
    out
}
