//! Path gates over the answer body.
//!
//! Gate A rejects file paths the evidence never showed. Gate B requires every path
//! mentioned in the body to be covered by a `CITATIONS` token on the same path.

use crate::allowed::AllowedTokenSet;
use crate::policy::{capped, ValidationPolicy};
use crate::tokens::{extract_citations, extract_paths, strip_header_lines, token_path};
use grounding_protocol::ValidationIssue;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

pub const MSG_GATE_A_NO_PATHS: &str =
    "Gate A (no new paths): evidence contained no extractable file paths; cannot validate";

static CITATIONS_ASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\*{0,2}CITATIONS\*{0,2}\s*=").expect("static citations assign regex"));
static VERDICT_ASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\*{0,2}VERDICT\*{0,2}\s*=").expect("static verdict assign regex"));

fn cited_paths(cited: &[String]) -> BTreeSet<String> {
    cited
        .iter()
        .filter_map(|t| token_path(t))
        .map(str::to_string)
        .collect()
}

fn mentioned_paths(answer: &str) -> BTreeSet<String> {
    extract_paths(&strip_header_lines(answer)).into_iter().collect()
}

/// Gate A and Gate B, each only when enabled by the policy.
#[must_use]
pub fn validate_path_gates(
    answer: &str,
    allowed: &AllowedTokenSet,
    policy: &ValidationPolicy,
) -> Vec<ValidationIssue> {
    if !policy.path_gates_enabled() {
        return Vec::new();
    }
    let mut issues = Vec::new();
    let cited = cited_paths(&extract_citations(answer));
    let mentioned = mentioned_paths(answer);

    if policy.enforce_no_new_paths {
        let referenced: BTreeSet<&str> = mentioned
            .iter()
            .chain(cited.iter())
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .collect();
        if !referenced.is_empty() && allowed.paths().next().is_none() {
            issues.push(ValidationIssue::path_gate(MSG_GATE_A_NO_PATHS));
        } else {
            let unknown: Vec<&str> = referenced
                .into_iter()
                .filter(|p| !allowed.has_path(p))
                .collect();
            if !unknown.is_empty() {
                issues.push(ValidationIssue::path_gate(format!(
                    "Gate A (no new paths): paths not present in evidence: {}",
                    capped(&unknown, policy.issue_caps.unknown_paths)
                )));
            }
        }
    }

    if policy.enforce_paths_must_be_cited {
        let uncited: Vec<&str> = mentioned
            .iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty() && !cited.contains(*p))
            .collect();
        if !uncited.is_empty() {
            issues.push(ValidationIssue::path_gate(format!(
                "Gate B (paths must be cited): paths mentioned without matching CITATIONS token: {}",
                capped(&uncited, policy.issue_caps.uncited_paths)
            )));
        }
    }
    issues
}

/// Add evidence tokens to `CITATIONS` for body paths that lack one.
///
/// Only tokens already present in the evidence are added. Returns the possibly
/// updated answer and the tokens that were added; an unchanged answer is returned
/// as-is with an empty list.
#[must_use]
pub fn autocomplete_citations(
    answer: &str,
    allowed: &AllowedTokenSet,
    policy: &ValidationPolicy,
) -> (String, Vec<String>) {
    if !policy.enforce_paths_must_be_cited || answer.is_empty() {
        return (answer.to_string(), Vec::new());
    }
    let cited_tokens = extract_citations(answer);
    let cited = cited_paths(&cited_tokens);
    let mut added: Vec<String> = Vec::new();
    for path in mentioned_paths(answer) {
        if path.is_empty() || cited.contains(&path) {
            continue;
        }
        let Some(token) = allowed.first_token_for(&path) else {
            continue;
        };
        if !cited_tokens.iter().any(|t| t == token) && !added.iter().any(|t| t == token) {
            added.push(token.to_string());
        }
    }
    if added.is_empty() {
        return (answer.to_string(), added);
    }

    let mut updated = false;
    let mut lines: Vec<String> = answer
        .lines()
        .map(|line| {
            if !CITATIONS_ASSIGN_RE.is_match(line) {
                return line.to_string();
            }
            let Some((prefix, rest)) = line.split_once('=') else {
                return line.to_string();
            };
            updated = true;
            let raw = rest.trim();
            let delim = if raw.contains(", ") { ", " } else { "," };
            let mut merged: Vec<&str> = raw.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
            for token in &added {
                if !merged.contains(&token.as_str()) {
                    merged.push(token);
                }
            }
            format!("{prefix}={}", merged.join(delim))
        })
        .collect();

    if !updated {
        let all: Vec<&str> = cited_tokens
            .iter()
            .chain(added.iter())
            .map(String::as_str)
            .filter(|t| !t.is_empty())
            .collect();
        let new_line = format!("CITATIONS={}", all.join(", "));
        match lines.iter().position(|line| VERDICT_ASSIGN_RE.is_match(line)) {
            Some(idx) => lines.insert(idx + 1, new_line),
            None => lines.insert(0, new_line),
        }
    }

    log::debug!("path_gate.autocomplete added={}", added.join(","));
    (lines.join("\n").trim().to_string(), added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn allowed() -> AllowedTokenSet {
        AllowedTokenSet::from_blocks(&[
            "[Preflight scan]:\nCITE=Q1_scan.json:1\n[scan] 2 results:\n  1. src/lib.rs:42 | unsafe\n  2. src/x.rs:3-9",
        ])
    }

    #[test]
    fn cited_paths_from_evidence_pass_both_gates() {
        let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS=src/lib.rs:42\n\nsrc/lib.rs has one unsafe block";
        assert!(validate_path_gates(answer, &allowed(), &ValidationPolicy::default()).is_empty());
    }

    #[test]
    fn gate_a_rejects_new_paths() {
        let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS=src/lib.rs:42\n\nsrc/lib.rs and src/new.rs";
        let issues = validate_path_gates(answer, &allowed(), &ValidationPolicy::default());
        assert_eq!(
            issues,
            vec![
                ValidationIssue::path_gate(r#"Gate A (no new paths): paths not present in evidence: ["src/new.rs"]"#),
                ValidationIssue::path_gate(
                    r#"Gate B (paths must be cited): paths mentioned without matching CITATIONS token: ["src/new.rs"]"#
                ),
            ]
        );
    }

    #[test]
    fn gate_a_without_evidence_paths_cannot_validate() {
        let empty = AllowedTokenSet::from_blocks(&["nothing citeable"]);
        let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS=src/lib.rs:42";
        let policy = ValidationPolicy {
            enforce_paths_must_be_cited: false,
            ..Default::default()
        };
        assert_eq!(
            validate_path_gates(answer, &empty, &policy),
            vec![ValidationIssue::path_gate(MSG_GATE_A_NO_PATHS)]
        );
    }

    #[test]
    fn disabled_gates_report_nothing() {
        let policy = ValidationPolicy {
            enforce_no_new_paths: false,
            enforce_paths_must_be_cited: false,
            ..Default::default()
        };
        assert!(validate_path_gates("VERDICT=X\n\nsrc/nowhere.rs", &allowed(), &policy).is_empty());
    }

    #[test]
    fn autocomplete_merges_into_existing_line() {
        let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS=Q1_scan.json:1\n\nsrc/lib.rs holds the unsafe";
        let (fixed, added) = autocomplete_citations(answer, &allowed(), &ValidationPolicy::default());
        assert_eq!(added, vec!["src/lib.rs:42".to_string()]);
        assert_eq!(
            fixed,
            "VERDICT=TRUE_POSITIVE\nCITATIONS=Q1_scan.json:1,src/lib.rs:42\n\nsrc/lib.rs holds the unsafe"
        );
        assert!(validate_path_gates(&fixed, &allowed(), &ValidationPolicy::default()).is_empty());

        let (again, more) = autocomplete_citations(&fixed, &allowed(), &ValidationPolicy::default());
        assert_eq!(again, fixed);
        assert!(more.is_empty());
    }

    #[test]
    fn autocomplete_inserts_line_after_verdict() {
        let answer = "VERDICT=TRUE_POSITIVE\nsrc/x.rs and src/lib.rs";
        let (fixed, added) = autocomplete_citations(answer, &allowed(), &ValidationPolicy::default());
        assert_eq!(added, vec!["src/lib.rs:42".to_string(), "src/x.rs:3-9".to_string()]);
        assert_eq!(
            fixed,
            "VERDICT=TRUE_POSITIVE\nCITATIONS=src/lib.rs:42, src/x.rs:3-9\nsrc/x.rs and src/lib.rs"
        );
    }

    #[test]
    fn autocomplete_skips_paths_without_evidence_tokens() {
        let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS=src/lib.rs:42\nsrc/other.rs";
        let (fixed, added) = autocomplete_citations(answer, &allowed(), &ValidationPolicy::default());
        assert_eq!(fixed, answer);
        assert!(added.is_empty());
    }
}
