use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Semantic meaning of a field in a row-shaped payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    Path,
    Line,
    Snippet,
    RowCount,
    RowContainer,
    HasHitsCount,
}

impl KeyRole {
    pub const ALL: [KeyRole; 6] = [
        KeyRole::RowContainer,
        KeyRole::HasHitsCount,
        KeyRole::RowCount,
        KeyRole::Path,
        KeyRole::Line,
        KeyRole::Snippet,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Line => "line",
            Self::Snippet => "snippet",
            Self::RowCount => "row_count",
            Self::RowContainer => "row_container",
            Self::HasHitsCount => "has_hits_count",
        }
    }

    /// Map a contract `semantic_roles` entry onto the roles it seeds.
    ///
    /// `count` seeds both counting roles; unknown names seed nothing.
    #[must_use]
    pub fn from_contract_role(raw: &str) -> &'static [KeyRole] {
        match raw.trim().to_ascii_lowercase().as_str() {
            "path" => &[KeyRole::Path],
            "line" => &[KeyRole::Line],
            "snippet" => &[KeyRole::Snippet],
            "row_container" | "rows_container" | "row_container_key" => &[KeyRole::RowContainer],
            "count" | "row_count" => &[KeyRole::RowCount, KeyRole::HasHitsCount],
            "has_hits_count" | "hit_count" => &[KeyRole::HasHitsCount],
            _ => &[],
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, de-duplicated field names per role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleKeys(BTreeMap<KeyRole, Vec<String>>);

impl RoleKeys {
    #[must_use]
    pub fn get(&self, role: KeyRole) -> &[String] {
        self.0.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append `key` to `role` unless it is blank, already present, or the role is full.
    pub fn push_unique(&mut self, role: KeyRole, key: &str, cap: usize) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        let keys = self.0.entry(role).or_default();
        if keys.len() >= cap || keys.iter().any(|k| k == key) {
            return false;
        }
        keys.push(key.to_string());
        true
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyRole, &[String])> {
        self.0.iter().map(|(role, keys)| (*role, keys.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_role_aliases_resolve() {
        assert_eq!(KeyRole::from_contract_role("ROWS_CONTAINER"), &[KeyRole::RowContainer]);
        assert_eq!(
            KeyRole::from_contract_role("count"),
            &[KeyRole::RowCount, KeyRole::HasHitsCount]
        );
        assert!(KeyRole::from_contract_role("embedding").is_empty());
    }

    #[test]
    fn role_keys_dedupe_and_cap() {
        let mut keys = RoleKeys::default();
        assert!(keys.push_unique(KeyRole::Path, " file_path ", 2));
        assert!(!keys.push_unique(KeyRole::Path, "file_path", 2));
        assert!(!keys.push_unique(KeyRole::Path, "", 2));
        assert!(keys.push_unique(KeyRole::Path, "path", 2));
        assert!(!keys.push_unique(KeyRole::Path, "title", 2));
        assert_eq!(keys.get(KeyRole::Path), ["file_path", "path"]);
        assert!(keys.get(KeyRole::Line).is_empty());
    }

    #[test]
    fn display_matches_serde_name() {
        for role in KeyRole::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{role}\""));
        }
    }
}
