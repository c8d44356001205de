use crate::classify::{
    is_count_key_name, is_line_key_candidate, is_path_key_candidate, is_snippet_key_candidate,
    looks_like_repo_path_text, looks_like_row_container_name,
};
use crate::contract::SchemaContract;
use crate::error::{KeyError, Result};
use crate::policy::DiscoveryPolicy;
use crate::role::{KeyRole, RoleKeys};
use crate::snapshot::{KeyMapSnapshot, COLUMN_SAMPLE_ITEMS};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One fact emitted by an extraction engine.
pub type Row = Map<String, Value>;

/// Payload key that records which dict key held the rows before filtering.
pub const ROW_CONTAINER_HINT_KEY: &str = "_stdout_row_container_key";

/// The run's effective key set.
///
/// Built once at start-up from the contract and column sources, then grown additively
/// as payloads are observed. Keys are never removed or reordered, and each role holds
/// at most [`DiscoveryPolicy::key_cap`] learned names.
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    policy: DiscoveryPolicy,
    engine: String,
    learned: RoleKeys,
    contract_loaded: bool,
    contract_version: Option<String>,
    contract_source: String,
    contract_columns: Vec<String>,
    inferred_source: String,
    inferred_columns: Vec<String>,
}

impl KeyRegistry {
    pub fn new(policy: DiscoveryPolicy, engine: impl Into<String>) -> Self {
        let mut registry = Self {
            policy,
            engine: engine.into(),
            learned: RoleKeys::default(),
            contract_loaded: false,
            contract_version: None,
            contract_source: "(none)".to_string(),
            contract_columns: Vec::new(),
            inferred_source: "(none)".to_string(),
            inferred_columns: Vec::new(),
        };
        let seeds = [
            (KeyRole::Path, registry.policy.always_include_path_keys.clone()),
            (KeyRole::Line, registry.policy.always_include_line_keys.clone()),
            (KeyRole::Snippet, registry.policy.always_include_snippet_keys.clone()),
        ];
        for (role, keys) in seeds {
            for key in keys {
                registry.add(role, &key);
            }
        }
        registry
    }

    #[must_use]
    pub fn policy(&self) -> &DiscoveryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn engine(&self) -> &str {
        &self.engine
    }

    #[must_use]
    pub fn contract_loaded(&self) -> bool {
        self.contract_loaded
    }

    /// Record a learned key. Returns whether the key was new.
    pub fn add(&mut self, role: KeyRole, key: &str) -> bool {
        let cap = self.policy.key_cap();
        let added = self.learned.push_unique(role, key, cap);
        if added {
            log::debug!("keys.learned role={role} key={}", key.trim());
        }
        added
    }

    /// Effective keys for `role`: configured base keys first, then learned keys.
    #[must_use]
    pub fn keys(&self, role: KeyRole) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for key in self
            .policy
            .base_keys
            .get(role)
            .iter()
            .chain(self.learned.get(role))
        {
            let key = key.trim();
            if !key.is_empty() && !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }

    #[must_use]
    pub fn learned(&self) -> &RoleKeys {
        &self.learned
    }

    /// Seed from an engine schema contract (authoritative source).
    ///
    /// A contract without columns is ignored and leaves the registry unloaded.
    pub fn seed_from_contract(&mut self, contract: &SchemaContract, source: &str) {
        if !(self.policy.enabled && self.policy.from_contract) {
            self.contract_source = "(disabled)".to_string();
            return;
        }
        if !contract.is_loaded() {
            self.contract_source = source.to_string();
            log::warn!("keys.contract.empty source={source}");
            return;
        }
        for role in KeyRole::ALL {
            for key in contract.semantic_keys.get(role) {
                self.add(role, key);
            }
        }
        self.seed_columns_by_name(&contract.columns);
        self.contract_loaded = true;
        self.contract_version = contract.schema_version.clone();
        self.contract_source = match &contract.schema_version {
            Some(version) => format!("{source}@{version}"),
            None => source.to_string(),
        };
        self.contract_columns = contract.columns.clone();
        log::info!(
            "keys.contract.loaded source={} columns={}",
            self.contract_source,
            contract.columns.len()
        );
    }

    /// Seed from inferred column names using the name heuristics.
    pub fn seed_from_columns(&mut self, columns: &[String], source: &str) {
        if !(self.policy.enabled && self.policy.from_columns) {
            self.inferred_source = "(disabled)".to_string();
            return;
        }
        self.inferred_source = source.to_string();
        self.inferred_columns = crate::contract::dedupe_trimmed(columns.to_vec());
        let columns = self.inferred_columns.clone();
        self.seed_columns_by_name(&columns);
    }

    fn seed_columns_by_name(&mut self, columns: &[String]) {
        for column in columns {
            let column = column.trim();
            if column.is_empty() {
                continue;
            }
            if is_path_key_candidate(column) {
                self.add(KeyRole::Path, column);
            }
            if is_line_key_candidate(column) {
                self.add(KeyRole::Line, column);
            }
            if is_snippet_key_candidate(column) {
                self.add(KeyRole::Snippet, column);
            }
            if is_count_key_name(column) {
                self.add(KeyRole::RowCount, column);
                self.add(KeyRole::HasHitsCount, column);
            }
        }
    }

    /// Learn field names from a payload actually produced during the run.
    pub fn learn_from_payload(&mut self, payload: &Value) {
        if !self.policy.learns_from_payloads() {
            return;
        }
        let mut rows: Vec<&Row> = Vec::new();
        match payload {
            Value::Array(items) => rows = items.iter().filter_map(Value::as_object).collect(),
            Value::Object(obj) => {
                for (key, value) in obj {
                    let Value::Array(items) = value else { continue };
                    let rowish: Vec<&Row> = items.iter().filter_map(Value::as_object).collect();
                    if rowish.is_empty() {
                        continue;
                    }
                    let base = self.policy.base_keys.get(KeyRole::RowContainer);
                    if looks_like_row_container_name(key) || base.iter().any(|k| k == key) {
                        self.add(KeyRole::RowContainer, key);
                    }
                    rows = rowish;
                    break;
                }
                for (key, value) in obj {
                    match value {
                        Value::Number(_) if is_count_key_name(key) => {
                            self.add(KeyRole::HasHitsCount, key);
                            self.add(KeyRole::RowCount, key);
                        }
                        Value::String(text) => {
                            if is_path_key_candidate(key) && looks_like_repo_path_text(text) {
                                self.add(KeyRole::Path, key);
                            }
                            if is_snippet_key_candidate(key) && !text.trim().is_empty() {
                                self.add(KeyRole::Snippet, key);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        for row in rows {
            for (key, value) in row {
                if key.trim().is_empty() {
                    continue;
                }
                match value {
                    Value::String(text) => {
                        if is_path_key_candidate(key) || looks_like_repo_path_text(text) {
                            self.add(KeyRole::Path, key);
                        }
                        if is_snippet_key_candidate(key) && !text.trim().is_empty() {
                            self.add(KeyRole::Snippet, key);
                        }
                    }
                    Value::Number(_) => {
                        if is_line_key_candidate(key) {
                            self.add(KeyRole::Line, key);
                        }
                        if is_count_key_name(key) {
                            self.add(KeyRole::HasHitsCount, key);
                            self.add(KeyRole::RowCount, key);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    #[must_use]
    pub fn missing_required_roles(&self) -> Vec<KeyRole> {
        self.policy
            .required_roles
            .iter()
            .copied()
            .filter(|role| self.keys(*role).is_empty())
            .collect()
    }

    /// The fail-closed verdict for this key set, if any.
    #[must_use]
    pub fn fatal_message(&self) -> Option<String> {
        let mut messages: Vec<String> = Vec::new();
        if self.policy.engine_requires_contract(&self.engine) && !self.contract_loaded {
            messages.push(format!(
                "engine schema contract required but not loaded (engine={} source={})",
                self.engine, self.contract_source
            ));
        }
        let missing = self.missing_required_roles();
        if self.policy.fail_on_missing_roles && !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|r| r.as_str()).collect();
            messages.push(format!(
                "missing required semantic roles: {}",
                names.join(", ")
            ));
        }
        if messages.is_empty() {
            None
        } else {
            Some(messages.join("; "))
        }
    }

    pub fn check_required(&self) -> Result<()> {
        match self.fatal_message() {
            Some(message) => Err(KeyError::fatal(message)),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> KeyMapSnapshot {
        let effective_keys: BTreeMap<KeyRole, Vec<String>> = KeyRole::ALL
            .iter()
            .map(|role| {
                let keys = self.keys(*role).into_iter().map(str::to_string).collect();
                (*role, keys)
            })
            .collect();
        KeyMapSnapshot {
            discovery_enabled: self.policy.enabled,
            engine: self.engine.clone(),
            contract_source: self.contract_source.clone(),
            contract_loaded: self.contract_loaded,
            contract_version: self.contract_version.clone(),
            contract_columns_count: self.contract_columns.len(),
            contract_columns_sample: sample(&self.contract_columns),
            inferred_source: self.inferred_source.clone(),
            inferred_columns_count: self.inferred_columns.len(),
            inferred_columns_sample: sample(&self.inferred_columns),
            required_roles: self.policy.required_roles.clone(),
            strict_require_contract: self.policy.require_contract,
            strict_fail_on_missing_roles: self.policy.fail_on_missing_roles,
            effective_keys,
            runtime_added_keys: self.learned.clone(),
            missing_required_roles: self.missing_required_roles(),
            fatal_error: self.fatal_message(),
        }
    }

    // ---- row accessors ----------------------------------------------------

    /// Repository path of a row, slash-normalized.
    #[must_use]
    pub fn row_path(&self, row: &Row) -> Option<String> {
        for key in self.keys(KeyRole::Path) {
            let Some(raw) = row.get(key).and_then(truthy_text) else {
                continue;
            };
            let mut text = raw.trim().replace('\\', "/");
            if key == "title" {
                text = text
                    .split_once("::")
                    .map_or(text.as_str(), |(head, _)| head)
                    .trim()
                    .to_string();
            }
            let text = strip_file_prefix(&text);
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
        row.iter().find_map(|(key, value)| {
            let text = value.as_str()?;
            if text.trim().is_empty() || !is_path_key_candidate(key) {
                return None;
            }
            let normalized = text.trim().replace('\\', "/");
            let candidate = strip_file_prefix(&normalized);
            looks_like_repo_path_text(candidate).then(|| candidate.to_string())
        })
    }

    #[must_use]
    pub fn row_line_start(&self, row: &Row) -> Option<String> {
        for key in self.keys(KeyRole::Line) {
            match row.get(key) {
                Some(Value::Null) | None => continue,
                Some(value) => return Some(scalar_text(value)),
            }
        }
        row.iter().find_map(|(key, value)| {
            (value.is_number() && is_line_key_candidate(key)).then(|| scalar_text(value))
        })
    }

    #[must_use]
    pub fn row_line_end(&self, row: &Row) -> Option<String> {
        match row.get("line_end") {
            Some(Value::Null) | None => None,
            Some(value) => Some(scalar_text(value)),
        }
    }

    /// `path:line`, `path:start-end`, or `path:1` when the row has no line.
    #[must_use]
    pub fn row_location(&self, row: &Row) -> Option<String> {
        let path = self.row_path(row)?;
        let start = self.row_line_start(row).filter(|s| !s.is_empty());
        let end = self.row_line_end(row).filter(|s| !s.is_empty());
        Some(match (start, end) {
            (Some(start), Some(end)) if end != start => format!("{path}:{start}-{end}"),
            (Some(start), _) => format!("{path}:{start}"),
            (None, _) => format!("{path}:1"),
        })
    }

    #[must_use]
    pub fn row_snippet<'a>(&self, row: &'a Row) -> Option<&'a str> {
        for key in self.keys(KeyRole::Snippet) {
            if let Some(text) = row.get(key).and_then(Value::as_str) {
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
        row.iter().find_map(|(key, value)| {
            let text = value.as_str()?;
            (!text.trim().is_empty() && is_snippet_key_candidate(key)).then_some(text)
        })
    }

    /// Aggregate count carried by a row, 0 when it has none.
    #[must_use]
    pub fn row_count(&self, row: &Row) -> i64 {
        for key in self.keys(KeyRole::RowCount) {
            match row.get(key) {
                Some(Value::Null) | None => continue,
                Some(value) => return value_as_i64(value).unwrap_or(0),
            }
        }
        row.iter()
            .find(|(key, value)| value.is_number() && is_count_key_name(key))
            .and_then(|(_, value)| value_as_i64(value))
            .unwrap_or(0)
    }

    /// Which key of a dict payload holds its rows.
    #[must_use]
    pub fn row_container_key<'a>(&self, obj: &'a Row) -> Option<&'a str> {
        if let Some(hinted) = obj.get(ROW_CONTAINER_HINT_KEY).and_then(Value::as_str) {
            let hinted = hinted.trim();
            if let Some((key, _)) = obj
                .iter()
                .find(|(key, value)| key.as_str() == hinted && value.is_array())
            {
                return Some(key.as_str());
            }
        }
        let holds_rows = |value: &Value| match value {
            Value::Array(items) => items.iter().any(Value::is_object),
            _ => false,
        };
        for key in self.keys(KeyRole::RowContainer) {
            if let Some((found, _)) = obj
                .iter()
                .find(|(found, value)| found.as_str() == key && holds_rows(value))
            {
                return Some(found.as_str());
            }
        }
        obj.iter()
            .find(|(_, value)| holds_rows(value))
            .map(|(key, _)| key.as_str())
    }
}

/// Build, seed, learn and check a key set in one call.
pub fn discover(
    policy: DiscoveryPolicy,
    engine: &str,
    contract: Option<(&SchemaContract, &str)>,
    inferred_columns: Option<(&[String], &str)>,
    sample_payloads: &[Value],
) -> Result<KeyRegistry> {
    let mut registry = KeyRegistry::new(policy, engine);
    if let Some((contract, source)) = contract {
        registry.seed_from_contract(contract, source);
    }
    if let Some((columns, source)) = inferred_columns {
        registry.seed_from_columns(columns, source);
    }
    for payload in sample_payloads {
        registry.learn_from_payload(payload);
    }
    registry.check_required()?;
    Ok(registry)
}

fn sample(columns: &[String]) -> Vec<String> {
    columns.iter().take(COLUMN_SAMPLE_ITEMS).cloned().collect()
}

fn strip_file_prefix(text: &str) -> &str {
    let trimmed = text.trim_start();
    match trimmed.get(..5) {
        Some(head) if head.eq_ignore_ascii_case("file:") => trimmed[5..].trim_start(),
        _ => text,
    }
}

fn truthy_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Text form of a scalar; non-scalars fall back to compact JSON.
#[must_use]
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Lenient integer coercion: numbers truncate, numeric strings parse, bools map to 0/1.
#[must_use]
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
