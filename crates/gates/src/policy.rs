use grounding_protocol::PATHLINE_GRAMMAR;
use serde::{Deserialize, Serialize};

pub const DEFAULT_VERDICTS: &[&str] = &["TRUE_POSITIVE", "FALSE_POSITIVE", "INDETERMINATE"];

/// How many offending items an issue message lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueCaps {
    pub invalid_citations: usize,
    pub unknown_citations: usize,
    pub unknown_paths: usize,
    pub uncited_paths: usize,
    pub adaptive_rerun_bullets: usize,
    pub sources: usize,
    pub deterministic_citations: usize,
    pub unknown_key_fields: usize,
    pub advice_top_k_cap: usize,
}

impl Default for IssueCaps {
    fn default() -> Self {
        Self {
            invalid_citations: 6,
            unknown_citations: 8,
            unknown_paths: 10,
            uncited_paths: 10,
            adaptive_rerun_bullets: 8,
            sources: 20,
            deterministic_citations: 5,
            unknown_key_fields: 5,
            advice_top_k_cap: 8,
        }
    }
}

/// The pack's `[validation]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub required_verdicts: Vec<String>,
    pub citation_format: String,
    pub fail_on_missing_citations: bool,
    pub enforce_citations_from_evidence: bool,
    /// Accept any line on a path the evidence cites, for engines that only emit `path:1` anchors
    pub allow_path_only_citations: bool,
    pub enforce_no_new_paths: bool,
    pub enforce_paths_must_be_cited: bool,
    pub apply_question_validators: bool,
    pub issue_caps: IssueCaps,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            required_verdicts: DEFAULT_VERDICTS.iter().map(|v| v.to_string()).collect(),
            citation_format: PATHLINE_GRAMMAR.to_string(),
            fail_on_missing_citations: true,
            enforce_citations_from_evidence: true,
            allow_path_only_citations: true,
            enforce_no_new_paths: true,
            enforce_paths_must_be_cited: true,
            apply_question_validators: true,
            issue_caps: IssueCaps::default(),
        }
    }
}

impl ValidationPolicy {
    #[must_use]
    pub fn path_gates_enabled(&self) -> bool {
        self.enforce_no_new_paths || self.enforce_paths_must_be_cited
    }

    /// Allowed verdicts, sorted, as they appear in issue messages.
    #[must_use]
    pub fn sorted_verdicts(&self) -> Vec<&str> {
        let mut verdicts: Vec<&str> = self.required_verdicts.iter().map(String::as_str).collect();
        verdicts.sort_unstable();
        verdicts.dedup();
        verdicts
    }
}

/// `items` cut to the first `cap`, rendered as a list for issue messages.
pub(crate) fn capped<S: AsRef<str>>(items: &[S], cap: usize) -> String {
    let shown: Vec<&str> = items.iter().take(cap).map(AsRef::as_ref).collect();
    format!("{shown:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let policy: ValidationPolicy = toml::from_str(
            r#"
            enforce_no_new_paths = false
            [issue_caps]
            unknown_paths = 3
            "#,
        )
        .unwrap();
        assert!(!policy.enforce_no_new_paths);
        assert!(policy.enforce_paths_must_be_cited);
        assert!(policy.allow_path_only_citations);
        assert_eq!(policy.issue_caps.unknown_paths, 3);
        assert_eq!(policy.issue_caps.invalid_citations, 6);
        assert_eq!(
            policy.sorted_verdicts(),
            vec!["FALSE_POSITIVE", "INDETERMINATE", "TRUE_POSITIVE"]
        );
    }

    #[test]
    fn capped_lists_are_debug_formatted() {
        assert_eq!(capped(&["a", "b", "c"], 2), r#"["a", "b"]"#);
    }
}
