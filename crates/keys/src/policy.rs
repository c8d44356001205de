use crate::role::KeyRole;
use serde::{Deserialize, Serialize};

/// Lower bound applied to `max_keys_per_role`.
pub const MIN_KEYS_PER_ROLE: usize = 8;

/// Knobs for building the effective key set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryPolicy {
    /// Master switch; when off only `base_keys` are effective
    pub enabled: bool,

    /// Seed from the engine schema contract
    pub from_contract: bool,

    /// Seed from inferred column names
    pub from_columns: bool,

    /// Learn from payloads observed during the run
    pub from_payloads: bool,

    /// Engines listed in `contract_engines` must supply a contract
    pub require_contract: bool,
    pub contract_engines: Vec<String>,

    /// Abort when a role in `required_roles` ends up empty
    pub fail_on_missing_roles: bool,
    pub required_roles: Vec<KeyRole>,

    pub max_keys_per_role: usize,

    pub always_include_path_keys: Vec<String>,
    pub always_include_line_keys: Vec<String>,
    pub always_include_snippet_keys: Vec<String>,

    /// Static keys that precede everything learned at run time
    pub base_keys: BaseKeys,
}

/// Static per-role key lists, configured rather than discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseKeys {
    pub row_container_keys: Vec<String>,
    pub has_hits_count_keys: Vec<String>,
    pub row_count_keys: Vec<String>,
    pub path_keys: Vec<String>,
    pub line_keys: Vec<String>,
    pub snippet_keys: Vec<String>,
}

impl BaseKeys {
    #[must_use]
    pub fn get(&self, role: KeyRole) -> &[String] {
        match role {
            KeyRole::RowContainer => &self.row_container_keys,
            KeyRole::HasHitsCount => &self.has_hits_count_keys,
            KeyRole::RowCount => &self.row_count_keys,
            KeyRole::Path => &self.path_keys,
            KeyRole::Line => &self.line_keys,
            KeyRole::Snippet => &self.snippet_keys,
        }
    }
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            from_contract: true,
            from_columns: true,
            from_payloads: true,
            require_contract: true,
            contract_engines: vec!["rsqt".to_string(), "raqt".to_string()],
            fail_on_missing_roles: true,
            required_roles: vec![KeyRole::Path, KeyRole::Line, KeyRole::Snippet],
            max_keys_per_role: 64,
            always_include_path_keys: Vec::new(),
            always_include_line_keys: Vec::new(),
            always_include_snippet_keys: Vec::new(),
            base_keys: BaseKeys::default(),
        }
    }
}

impl DiscoveryPolicy {
    /// Policy that never fails the run, for ad-hoc tooling over unknown payloads.
    pub fn lenient() -> Self {
        Self {
            require_contract: false,
            fail_on_missing_roles: false,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn key_cap(&self) -> usize {
        self.max_keys_per_role.max(MIN_KEYS_PER_ROLE)
    }

    #[must_use]
    pub fn engine_requires_contract(&self, engine: &str) -> bool {
        let engine = engine.trim().to_ascii_lowercase();
        self.require_contract && self.contract_engines.iter().any(|e| e.eq_ignore_ascii_case(&engine))
    }

    #[must_use]
    pub fn learns_from_payloads(&self) -> bool {
        self.enabled && self.from_payloads
    }
}
