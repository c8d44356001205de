//! # Grounding Gates
//!
//! Pure checks that decide whether a model answer is grounded in the evidence it
//! was shown.
//!
//! ```text
//! evidence blocks ──> AllowedTokenSet (tokens, spans, paths)
//!                            │
//! answer ──> schema gate ────┼──> provenance gate ──> path gates A/B
//!              │             │                           │
//!              ▼             ▼                           ▼
//!         Vec<ValidationIssue> (schema, "Citation provenance: ", "Path gates: ")
//! ```
//!
//! Nothing here performs IO on the answer path or returns an error: every problem
//! becomes a [`grounding_protocol::ValidationIssue`].

mod advice;
mod allowed;
mod audit;
mod error;
mod path_gate;
mod paths;
mod policy;
mod provenance;
mod schema;
mod tokens;
mod validators;

pub use advice::{
    numbered_issue_blocks, validate_advice, AdvicePolicy, MSG_ADVICE_ALL_GENERIC, MSG_ADVICE_EMPTY,
    MSG_ADVICE_NOT_NUMBERED, MSG_ADVICE_NO_EVIDENCE,
};
pub use allowed::AllowedTokenSet;
pub use audit::EvidenceAudit;
pub use error::{GateError, Result};
pub use path_gate::{autocomplete_citations, validate_path_gates, MSG_GATE_A_NO_PATHS};
pub use paths::{is_low_confidence_path, PathUniverse};
pub use policy::{IssueCaps, ValidationPolicy, DEFAULT_VERDICTS};
pub use provenance::{check_cited_tokens, validate_provenance, MSG_NO_EVIDENCE_TOKENS};
pub use schema::{
    answer_verdict, extract_required_keys, invalid_citation_tokens, is_banned_header_line, validate_required_key_lines,
    validate_schema,
    KEY_PLACEHOLDERS, MSG_BANNED_HEADERS, MSG_CITATIONS_EMPTY, MSG_CITATIONS_SECTION,
    MSG_CITATIONS_TWICE, MSG_FIRST_LINE, MSG_MISSING_CITATIONS, MSG_MISSING_VERDICT,
    MSG_SECOND_LINE, MSG_VERDICT_TWICE,
};
pub use tokens::{
    cite_anchors, extract_citations, extract_paths, is_pathline, normalize, normalize_token,
    parse_citations_value, scan_citation_tokens, strip_emphasis, strip_header_lines, token_path,
    CITATION_TOKEN_RE, PATHLINE_RE,
};
pub use validators::{QuestionValidators, ValidatorRule};

use grounding_protocol::ValidationIssue;

/// Schema gate, then provenance when enforced, then the path gates.
///
/// This is the issue list the retry ladder works from. Per-question validators and
/// required key lines are applied separately at final validation.
#[must_use]
pub fn check_answer(
    answer: &str,
    allowed: &AllowedTokenSet,
    policy: &ValidationPolicy,
) -> Vec<ValidationIssue> {
    let mut issues = validate_schema(answer, policy);
    if policy.enforce_citations_from_evidence {
        issues.extend(validate_provenance(answer, allowed, policy));
    }
    issues.extend(validate_path_gates(answer, allowed, policy));
    issues
}
