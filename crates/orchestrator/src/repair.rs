//! Deterministic, no-model repairs of the answer contract.

use grounding_gates::{
    check_cited_tokens, extract_citations, is_banned_header_line, is_pathline, strip_emphasis,
    AllowedTokenSet, ValidationPolicy,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const NOTE_REPAIRED_VERDICT: &str = "repaired_verdict";
pub const NOTE_REPAIRED_CITATIONS: &str = "repaired_citations";
pub const DETERMINISTIC_NOTE: &str =
    "DETERMINISTIC_NOTE=question.answer_mode=deterministic; model answer generation was skipped.";

static VERDICT_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*VERDICT[ \t]*[=:][ \t]*([A-Z_]+)[ \t]*$").expect("static verdict value regex")
});
static VERDICT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*VERDICT\s*[=:]").expect("static verdict line regex"));
static CITATIONS_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*CITATIONS\b").expect("static citations line regex"));

/// The policy's `[deterministic]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairPolicy {
    /// Verdict substituted when the answer has none or an unknown one
    pub default_verdict: String,
    /// `{qid}{fallback_suffix}` is cited when evidence has no tokens at all
    pub fallback_suffix: String,
    /// CITATIONS values that count as "not filled in"
    pub citation_placeholders: Vec<String>,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            default_verdict: "INDETERMINATE".to_string(),
            fallback_suffix: "_preflight.json:1".to_string(),
            citation_placeholders: ["NONE", "N/A", "NA", "INSUFFICIENT", "UNKNOWN", "MISSING"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RepairPolicy {
    fn is_placeholder(&self, token: &str) -> bool {
        let upper = token.trim().to_uppercase();
        self.citation_placeholders.iter().any(|p| *p == upper)
    }

    /// The first `cap` known-good evidence tokens, sorted, or the fallback anchor.
    #[must_use]
    pub fn fallback_citations(&self, qid: &str, allowed: &AllowedTokenSet, cap: usize) -> String {
        let mut tokens: Vec<&str> = allowed.tokens().filter(|t| is_pathline(t)).collect();
        tokens.sort_unstable();
        tokens.dedup();
        if tokens.is_empty() {
            format!("{qid}{}", self.fallback_suffix)
        } else {
            tokens.into_iter().take(cap.max(1)).collect::<Vec<_>>().join(", ")
        }
    }

    fn verdict_for(&self, validation: &ValidationPolicy) -> String {
        let allowed = validation.sorted_verdicts();
        if allowed.is_empty() || allowed.contains(&self.default_verdict.as_str()) {
            self.default_verdict.clone()
        } else {
            allowed[0].to_string()
        }
    }
}

/// Rebuild the VERDICT/CITATIONS header of a strict-template answer.
///
/// The body is kept; header lines and every heading the schema gate bans
/// (`Analysis:`, `Citations:` in any case) are dropped and regenerated. Citations are replaced only when missing,
/// placeholder-only, malformed, or (when enforced) not backed by evidence, and
/// the replacement only ever uses tokens already present in `allowed`.
/// Returns the rebuilt answer and the repair notes.
#[must_use]
pub fn repair_strict_contract(
    qid: &str,
    answer: &str,
    allowed: &AllowedTokenSet,
    validation: &ValidationPolicy,
    repair: &RepairPolicy,
) -> (String, Vec<&'static str>) {
    let mut notes = Vec::new();
    let clean = strip_emphasis(answer);
    let allowed_verdicts = validation.sorted_verdicts();

    let found = VERDICT_VALUE_RE
        .captures(&clean)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let verdict = match found {
        Some(v) if allowed_verdicts.is_empty() || allowed_verdicts.contains(&v.as_str()) => v,
        _ => {
            notes.push(NOTE_REPAIRED_VERDICT);
            repair.verdict_for(validation)
        }
    };

    let tokens = extract_citations(&clean);
    let placeholder_only = !tokens.is_empty() && tokens.iter().all(|t| repair.is_placeholder(t));
    let bad_format = tokens.iter().any(|t| !is_pathline(t));
    let mut needs_repair = tokens.is_empty() || placeholder_only || bad_format;
    if validation.enforce_citations_from_evidence && !check_cited_tokens(&tokens, allowed, validation).is_empty() {
        needs_repair = true;
    }
    let citations = if needs_repair {
        notes.push(NOTE_REPAIRED_CITATIONS);
        repair.fallback_citations(qid, allowed, validation.issue_caps.deterministic_citations)
    } else {
        tokens.join(", ")
    };

    let body: Vec<&str> = clean
        .lines()
        .filter(|line| {
            !VERDICT_LINE_RE.is_match(line)
                && !CITATIONS_LINE_RE.is_match(line)
                && !is_banned_header_line(line)
        })
        .collect();
    let repaired = format!(
        "VERDICT={verdict}\nCITATIONS={citations}\n\n{}",
        body.join("\n").trim()
    );
    (format!("{}\n", repaired.trim()), notes)
}

/// Answer used for deterministic questions no synthesizer claims.
#[must_use]
pub fn seed_answer(qid: &str, allowed: &AllowedTokenSet, validation: &ValidationPolicy, repair: &RepairPolicy) -> String {
    let citations = repair.fallback_citations(qid, allowed, validation.issue_caps.deterministic_citations);
    format!("VERDICT=INDETERMINATE\nCITATIONS={citations}\n\n{DETERMINISTIC_NOTE}\n")
}
