use crate::role::{KeyRole, RoleKeys};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many column names a snapshot keeps per source.
pub const COLUMN_SAMPLE_ITEMS: usize = 40;

/// Serializable view of the effective key set, written as `EVIDENCE_KEY_MAP.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapSnapshot {
    pub discovery_enabled: bool,
    pub engine: String,
    pub contract_source: String,
    pub contract_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_version: Option<String>,
    pub contract_columns_count: usize,
    pub contract_columns_sample: Vec<String>,
    pub inferred_source: String,
    pub inferred_columns_count: usize,
    pub inferred_columns_sample: Vec<String>,
    pub required_roles: Vec<KeyRole>,
    pub strict_require_contract: bool,
    pub strict_fail_on_missing_roles: bool,
    pub effective_keys: BTreeMap<KeyRole, Vec<String>>,
    pub runtime_added_keys: RoleKeys,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_required_roles: Vec<KeyRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
}

impl KeyMapSnapshot {
    pub const FILE_NAME: &'static str = "EVIDENCE_KEY_MAP.json";

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
