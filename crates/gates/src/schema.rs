//! Answer header contract: `VERDICT=` on the first non-empty line, `CITATIONS=` on the
//! second, each exactly once.

use crate::policy::{capped, ValidationPolicy};
use crate::tokens::{is_pathline, normalize_token, strip_emphasis};
use grounding_protocol::{IssueKind, ValidationIssue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

pub const MSG_FIRST_LINE: &str =
    "First non-empty line must be VERDICT=TRUE_POSITIVE|FALSE_POSITIVE|INDETERMINATE";
pub const MSG_SECOND_LINE: &str = "Second non-empty line must be CITATIONS=path:line(-line), ...";
pub const MSG_BANNED_HEADERS: &str =
    "Markdown/standalone 'Analysis:' or 'CITATIONS:' headers are not allowed";
pub const MSG_MISSING_VERDICT: &str =
    "Missing required line: VERDICT=TRUE_POSITIVE|FALSE_POSITIVE|INDETERMINATE";
pub const MSG_VERDICT_TWICE: &str = "VERDICT must appear exactly once";
pub const MSG_CITATIONS_SECTION: &str =
    "CITATIONS must be a single comma-separated line (no standalone CITATIONS section)";
pub const MSG_MISSING_CITATIONS: &str = "Missing required line: CITATIONS=path:line(-line), ...";
pub const MSG_CITATIONS_TWICE: &str = "CITATIONS must appear exactly once as a single line";
pub const MSG_CITATIONS_EMPTY: &str = "CITATIONS is empty but fail_on_missing_citations=true";

/// Values treated as "not filled in" for required key lines.
pub const KEY_PLACEHOLDERS: &[&str] = &["NONE", "N/A", "NA", "UNKNOWN", "TBD", "MISSING", "..."];

static FIRST_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^VERDICT\s*[=:]\s*[A-Z_]+\s*$").expect("static verdict regex"));
static SECOND_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^CITATIONS\s*[=:]\s*.+$").expect("static citations regex"));
static BANNED_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^[ \t]*(?:#{1,6}[ \t]*)?(?:analysis|citations)[ \t]*:[ \t]*$")
        .expect("static header regex")
});
static VERDICT_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*VERDICT[ \t]*[=:][ \t]*([A-Z_]+)[ \t]*$").expect("static verdict line regex")
});
static CITATIONS_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*CITATIONS[ \t]*[=:][ \t]*(.*)$").expect("static citations line regex")
});
static CITATIONS_BARE_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*CITATIONS[ \t]*$").expect("static citations header regex")
});
static KEY_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Z][A-Z0-9_]*)\s*=\s*(.*?)\s*$").expect("static key line regex")
});
static TEMPLATE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Z][A-Z0-9_]*)\s*=").expect("static template key regex"));

/// Whether `line` is a standalone `Analysis:`/`Citations:` heading the schema gate rejects.
#[must_use]
pub fn is_banned_header_line(line: &str) -> bool {
    BANNED_HEADER_RE.is_match(line.trim_end_matches(['\r', '\n']))
}

/// The verdict an answer declares on its own `VERDICT=` line, if any.
#[must_use]
pub fn answer_verdict(answer: &str) -> Option<&str> {
    VERDICT_LINE_RE
        .captures(answer)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Check the header contract. Pure; every problem is returned as a schema issue.
#[must_use]
pub fn validate_schema(answer: &str, policy: &ValidationPolicy) -> Vec<ValidationIssue> {
    let mut issues: Vec<String> = Vec::new();
    let clean = strip_emphasis(answer);
    let nonempty: Vec<&str> = clean
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if !nonempty.first().is_some_and(|line| FIRST_LINE_RE.is_match(line)) {
        issues.push(MSG_FIRST_LINE.to_string());
    }
    if !nonempty.get(1).is_some_and(|line| SECOND_LINE_RE.is_match(line)) {
        issues.push(MSG_SECOND_LINE.to_string());
    }
    if BANNED_HEADER_RE.is_match(&clean) {
        issues.push(MSG_BANNED_HEADERS.to_string());
    }

    let verdicts: Vec<&str> = VERDICT_LINE_RE
        .captures_iter(&clean)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    match verdicts.first() {
        None => issues.push(MSG_MISSING_VERDICT.to_string()),
        Some(verdict) => {
            let allowed = policy.sorted_verdicts();
            if !allowed.is_empty() && !allowed.contains(verdict) {
                issues.push(format!("Invalid VERDICT '{verdict}' (allowed: {allowed:?})"));
            }
            if verdicts.len() > 1 {
                issues.push(MSG_VERDICT_TWICE.to_string());
            }
        }
    }

    let citation_lines: Vec<&str> = CITATIONS_LINE_RE
        .captures_iter(&clean)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .collect();
    let citations_raw = match citation_lines.first() {
        None => {
            if CITATIONS_BARE_HEADER_RE.is_match(&clean) {
                issues.push(MSG_CITATIONS_SECTION.to_string());
            }
            issues.push(MSG_MISSING_CITATIONS.to_string());
            ""
        }
        Some(raw) => {
            if citation_lines.len() > 1 {
                issues.push(MSG_CITATIONS_TWICE.to_string());
            }
            raw
        }
    };
    if policy.fail_on_missing_citations && citations_raw.is_empty() {
        issues.push(MSG_CITATIONS_EMPTY.to_string());
    }
    if !citations_raw.is_empty() {
        let bad = invalid_citation_tokens(citations_raw);
        if !bad.is_empty() {
            issues.push(format!(
                "CITATIONS contains invalid tokens (expected {}): {}",
                policy.citation_format,
                capped(&bad, policy.issue_caps.invalid_citations)
            ));
        }
    }

    issues.into_iter().map(ValidationIssue::schema).collect()
}

/// Comma-separated entries that do not normalize to `path:line(-line)`.
#[must_use]
pub fn invalid_citation_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(normalize_token)
        .filter(|t| !is_pathline(t))
        .collect()
}

/// `KEY=` lines a strict template declares, other than VERDICT and CITATIONS.
#[must_use]
pub fn extract_required_keys(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for line in template.lines() {
        let Some(caps) = TEMPLATE_KEY_RE.captures(line.trim()) else {
            continue;
        };
        let key = caps[1].trim().to_ascii_uppercase();
        if key == "VERDICT" || key == "CITATIONS" || keys.contains(&key) {
            continue;
        }
        keys.push(key);
    }
    keys
}

/// Every key in `keys` must appear as `KEY=value` with a real value.
#[must_use]
pub fn validate_required_key_lines(answer: &str, keys: &[String]) -> Vec<ValidationIssue> {
    if keys.is_empty() {
        return Vec::new();
    }
    let mut values: HashMap<String, String> = HashMap::new();
    for line in answer.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = KEY_LINE_RE.captures(line) {
            values.insert(caps[1].to_ascii_uppercase(), caps[2].trim().to_string());
        }
    }
    keys.iter()
        .filter(|key| {
            let value = values.get(key.as_str()).map(String::as_str).unwrap_or("");
            value.is_empty() || KEY_PLACEHOLDERS.contains(&value.to_ascii_uppercase().as_str())
        })
        .map(|key| ValidationIssue::new(IssueKind::RequiredKey, format!("Missing required key line: {key}=")))
        .collect()
}
