//! Advice quality gate for `ISSUE_n` style corrective guidance.

use crate::allowed::AllowedTokenSet;
use crate::policy::{capped, IssueCaps};
use crate::tokens::{is_pathline, parse_citations_value};
use grounding_protocol::ValidationIssue;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MSG_ADVICE_EMPTY: &str = "Advice output is empty";
pub const MSG_ADVICE_NOT_NUMBERED: &str = "Advice output must include numbered ISSUE_n fields";
pub const MSG_ADVICE_NO_EVIDENCE: &str =
    "Advice provenance check failed: no citeable evidence tokens extracted for this question";
pub const MSG_ADVICE_ALL_GENERIC: &str = "Advice is praise-only or generic across all issues";

const ADVICE_PLACEHOLDERS: &[&str] = &["NONE", "N/A", "NA", "UNKNOWN", "INSUFFICIENT", "...", "TBD", "MISSING"];

static NUMBERED_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Z_]+)_(\d+)\s*=\s*(.*?)\s*$").expect("static numbered field regex")
});
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("static word regex"));

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The runner policy's `[advice_quality_gate]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvicePolicy {
    pub enabled: bool,
    pub mission_pack_type_regex: String,
    pub require_llm_advice_mode: bool,
    pub retry_on_validation_fail: bool,
    pub retry_attempts: usize,
    pub retry_issue_bullets: usize,
    pub min_concrete_issues_when_evidence: usize,
    pub min_issue_words: usize,
    pub required_issue_fields: Vec<String>,
    pub praise_phrases: Vec<String>,
    pub generic_issue_phrases: Vec<String>,
    pub imperative_verbs: Vec<String>,
}

impl Default for AdvicePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            mission_pack_type_regex: "(?i)mission".to_string(),
            require_llm_advice_mode: true,
            retry_on_validation_fail: true,
            retry_attempts: 1,
            retry_issue_bullets: 8,
            min_concrete_issues_when_evidence: 2,
            min_issue_words: 4,
            required_issue_fields: strings(&["ISSUE", "WHY_IT_MATTERS", "PATCH_SKETCH", "TEST_PLAN", "CITATIONS"]),
            praise_phrases: strings(&[
                "you are doing fine",
                "you are doing great",
                "looks good",
                "great job",
                "nice work",
                "very nice",
                "solid work",
                "well done",
            ]),
            generic_issue_phrases: strings(&[
                "improve error handling",
                "add more tests",
                "improve documentation",
                "refactor this code",
                "consider improvements",
                "optimize performance",
            ]),
            imperative_verbs: strings(&[
                "replace", "add", "remove", "enforce", "introduce", "refactor", "migrate", "implement", "guard",
                "ban", "split", "rename", "pin", "enable", "disable", "write", "test", "assert", "validate",
                "harden",
            ]),
        }
    }
}

impl AdvicePolicy {
    /// Mission packs treat leftover advice issues as fatal.
    #[must_use]
    pub fn is_mission_pack_type(&self, pack_type: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match Regex::new(&self.mission_pack_type_regex) {
            Ok(re) => re.is_match(pack_type),
            Err(_) => pack_type.to_lowercase().contains("mission"),
        }
    }

    fn min_concrete(&self) -> usize {
        self.min_concrete_issues_when_evidence.max(1)
    }

    /// Placeholder, praise, generic phrasing, too short, or no imperative verb.
    #[must_use]
    pub fn looks_generic_or_praise(&self, text: &str) -> bool {
        let raw = text.trim();
        if is_placeholder(raw) {
            return true;
        }
        let low = raw.to_lowercase();
        let contains_any = |phrases: &[String]| {
            phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .any(|p| !p.is_empty() && low.contains(&p))
        };
        if contains_any(&self.praise_phrases) || contains_any(&self.generic_issue_phrases) {
            return true;
        }
        let words: Vec<String> = WORD_RE
            .find_iter(&low)
            .map(|m| m.as_str().to_string())
            .collect();
        if words.len() < self.min_issue_words.max(1) {
            return true;
        }
        if self.imperative_verbs.is_empty() {
            return false;
        }
        !self
            .imperative_verbs
            .iter()
            .map(|v| v.trim().to_lowercase())
            .any(|verb| words.iter().any(|w| *w == verb))
    }
}

fn is_placeholder(text: &str) -> bool {
    let raw = text.trim();
    raw.is_empty() || ADVICE_PLACEHOLDERS.contains(&raw.to_uppercase().as_str())
}

/// `FIELD_n=value` lines grouped by issue number.
#[must_use]
pub fn numbered_issue_blocks(text: &str) -> BTreeMap<u32, BTreeMap<String, String>> {
    let mut out: BTreeMap<u32, BTreeMap<String, String>> = BTreeMap::new();
    for line in text.lines() {
        let Some(caps) = NUMBERED_FIELD_RE.captures(line) else {
            continue;
        };
        let Ok(idx) = caps[2].parse::<u32>() else {
            continue;
        };
        out.entry(idx)
            .or_default()
            .insert(caps[1].trim().to_uppercase(), caps[3].trim().to_string());
    }
    out
}

/// Check advice text against the evidence and the quality policy.
#[must_use]
pub fn validate_advice(
    text: &str,
    allowed: &AllowedTokenSet,
    policy: &AdvicePolicy,
    caps: &IssueCaps,
) -> Vec<ValidationIssue> {
    let text = text.trim();
    if text.is_empty() {
        return vec![ValidationIssue::advice(MSG_ADVICE_EMPTY)];
    }
    let blocks = numbered_issue_blocks(text);
    if blocks.is_empty() {
        return vec![ValidationIssue::advice(MSG_ADVICE_NOT_NUMBERED)];
    }

    let mut issues: Vec<String> = Vec::new();
    let mut concrete = 0usize;
    let mut generic = 0usize;
    let empty = String::new();

    for (idx, block) in &blocks {
        let field = |name: &str| block.get(name).unwrap_or(&empty);
        if policy.looks_generic_or_praise(field("ISSUE")) {
            generic += 1;
            issues.push(format!("ISSUE_{idx} is generic/praise-only or non-actionable"));
        }

        let missing: Vec<&str> = policy
            .required_issue_fields
            .iter()
            .map(String::as_str)
            .filter(|name| is_placeholder(field(*name)))
            .collect();
        if !missing.is_empty() {
            issues.push(format!("ISSUE_{idx} missing required fields: {missing:?}"));
            continue;
        }

        let tokens = parse_citations_value(field("CITATIONS"));
        if tokens.is_empty() {
            issues.push(format!("ISSUE_{idx} CITATIONS is empty or unparsable"));
            continue;
        }
        let bad: Vec<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|t| !is_pathline(t))
            .collect();
        if !bad.is_empty() {
            issues.push(format!(
                "ISSUE_{idx} CITATIONS contains invalid tokens (expected path:line(-line)): {}",
                capped(&bad, caps.invalid_citations)
            ));
            continue;
        }
        if allowed.is_empty() {
            issues.push(MSG_ADVICE_NO_EVIDENCE.to_string());
            continue;
        }
        let unknown = allowed.unknown(&tokens);
        if !unknown.is_empty() {
            issues.push(format!(
                "ISSUE_{idx} CITATIONS not backed by evidence: {}",
                capped(&unknown, caps.unknown_citations)
            ));
            continue;
        }
        concrete += 1;
    }

    if generic > 0 && generic == blocks.len() {
        issues.push(MSG_ADVICE_ALL_GENERIC.to_string());
    }
    if !allowed.is_empty() && concrete < policy.min_concrete() {
        issues.push(format!(
            "Advice must provide at least {} concrete issues when citeable evidence exists (found {concrete})",
            policy.min_concrete()
        ));
    }
    issues.into_iter().map(ValidationIssue::advice).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn allowed() -> AllowedTokenSet {
        AllowedTokenSet::from_blocks(&["  1. src/lib.rs:10-20\n  2. src/io.rs:5"])
    }

    fn issue(n: u32, issue: &str, cite: &str) -> String {
        format!(
            "ISSUE_{n}={issue}\nWHY_IT_MATTERS_{n}=panics on short input\nPATCH_SKETCH_{n}=use slice::get\nTEST_PLAN_{n}=add a short-input test\nCITATIONS_{n}={cite}\n"
        )
    }

    fn messages(text: &str) -> Vec<String> {
        validate_advice(text, &allowed(), &AdvicePolicy::default(), &IssueCaps::default())
            .into_iter()
            .map(|i| i.message)
            .collect()
    }

    #[test]
    fn two_concrete_issues_pass() {
        let text = issue(1, "Replace the unchecked index with get() in the parser", "src/lib.rs:12")
            + &issue(2, "Guard the file handle with a scoped close", "src/io.rs:5");
        assert!(messages(&text).is_empty());
    }

    #[test]
    fn empty_and_unnumbered_advice() {
        assert_eq!(messages("  "), vec![MSG_ADVICE_EMPTY.to_string()]);
        assert_eq!(messages("Looks fine to me"), vec![MSG_ADVICE_NOT_NUMBERED.to_string()]);
    }

    #[test]
    fn praise_only_advice_is_rejected() {
        let text = issue(1, "Great job, looks good overall", "src/lib.rs:12");
        assert_eq!(
            messages(&text),
            vec![
                "ISSUE_1 is generic/praise-only or non-actionable".to_string(),
                MSG_ADVICE_ALL_GENERIC.to_string(),
                "Advice must provide at least 2 concrete issues when citeable evidence exists (found 1)".to_string(),
            ]
        );
    }

    #[test]
    fn missing_fields_and_bad_citations() {
        let text = "ISSUE_1=Remove the global mutex from the cache path\nCITATIONS_1=src/lib.rs:12\n".to_string()
            + &issue(2, "Harden the parser against truncated frames", "src/lib.rs")
            + &issue(3, "Split the handler into read and write halves", "src/other.rs:4");
        assert_eq!(
            messages(&text),
            vec![
                r#"ISSUE_1 missing required fields: ["WHY_IT_MATTERS", "PATCH_SKETCH", "TEST_PLAN"]"#.to_string(),
                r#"ISSUE_2 CITATIONS contains invalid tokens (expected path:line(-line)): ["src/lib.rs"]"#.to_string(),
                r#"ISSUE_3 CITATIONS not backed by evidence: ["src/other.rs:4"]"#.to_string(),
                "Advice must provide at least 2 concrete issues when citeable evidence exists (found 0)".to_string(),
            ]
        );
    }

    #[test]
    fn no_evidence_skips_minimum_but_flags_provenance() {
        let text = issue(1, "Replace the unchecked index with get() in the parser", "src/lib.rs:12");
        let issues = validate_advice(&text, &AllowedTokenSet::default(), &AdvicePolicy::default(), &IssueCaps::default());
        assert_eq!(issues, vec![ValidationIssue::advice(MSG_ADVICE_NO_EVIDENCE)]);
    }

    #[test]
    fn mission_pack_detection() {
        let policy = AdvicePolicy::default();
        assert!(policy.is_mission_pack_type("rust_audit_MISSION_v2"));
        assert!(!policy.is_mission_pack_type("rust_audit"));
        let disabled = AdvicePolicy {
            enabled: false,
            ..Default::default()
        };
        assert!(!disabled.is_mission_pack_type("mission"));
    }

    #[test]
    fn generic_detection_rules() {
        let policy = AdvicePolicy::default();
        assert!(policy.looks_generic_or_praise("N/A"));
        assert!(policy.looks_generic_or_praise("Please improve error handling everywhere"));
        assert!(policy.looks_generic_or_praise("Add tests"));
        assert!(policy.looks_generic_or_praise("The parser could be better overall"));
        assert!(!policy.looks_generic_or_praise("Validate frame length before slicing"));
    }
}
