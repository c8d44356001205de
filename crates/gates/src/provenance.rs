use crate::allowed::AllowedTokenSet;
use crate::policy::{capped, ValidationPolicy};
use crate::tokens::extract_citations;
use grounding_protocol::ValidationIssue;

pub const MSG_NO_EVIDENCE_TOKENS: &str =
    "No citeable tokens extracted from evidence (cannot validate citation provenance)";

/// Every cited token must be backed by the injected evidence.
///
/// An answer with no citations produces nothing here; the schema gate owns that case.
#[must_use]
pub fn validate_provenance(
    answer: &str,
    allowed: &AllowedTokenSet,
    policy: &ValidationPolicy,
) -> Vec<ValidationIssue> {
    let cited = extract_citations(answer);
    check_cited_tokens(&cited, allowed, policy)
}

/// Provenance check over an already-extracted citation list.
#[must_use]
pub fn check_cited_tokens<S: AsRef<str>>(
    cited: &[S],
    allowed: &AllowedTokenSet,
    policy: &ValidationPolicy,
) -> Vec<ValidationIssue> {
    if allowed.is_empty() {
        return vec![ValidationIssue::provenance(MSG_NO_EVIDENCE_TOKENS)];
    }
    if cited.is_empty() {
        return Vec::new();
    }
    let unknown = allowed.unknown_with(cited, policy.allow_path_only_citations);
    if unknown.is_empty() {
        return Vec::new();
    }
    log::debug!(
        "provenance.unknown_tokens count={} allowed={}",
        unknown.len(),
        allowed.len()
    );
    vec![ValidationIssue::provenance(format!(
        "Unknown citation tokens (not in evidence): {}",
        capped(&unknown, policy.issue_caps.unknown_citations)
    ))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn allowed() -> AllowedTokenSet {
        AllowedTokenSet::from_blocks(&["[scan] 1 results:\n  1. p.rs:5-10"])
    }

    #[test]
    fn overlapping_citation_passes() {
        let issues = validate_provenance(
            "VERDICT=TRUE_POSITIVE\nCITATIONS=p.rs:7",
            &allowed(),
            &ValidationPolicy::default(),
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn strict_policy_rejects_a_line_outside_every_span() {
        let policy = ValidationPolicy {
            allow_path_only_citations: false,
            ..ValidationPolicy::default()
        };
        let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS=p.rs:7, p.rs:900";
        assert!(validate_provenance(answer, &allowed(), &ValidationPolicy::default()).is_empty());
        assert_eq!(
            validate_provenance(answer, &allowed(), &policy),
            vec![ValidationIssue::provenance(
                r#"Unknown citation tokens (not in evidence): ["p.rs:900"]"#
            )]
        );
    }

    #[test]
    fn foreign_path_is_named() {
        let issues = validate_provenance(
            "VERDICT=TRUE_POSITIVE\nCITATIONS=p.rs:7, q.rs:7",
            &allowed(),
            &ValidationPolicy::default(),
        );
        assert_eq!(
            issues,
            vec![ValidationIssue::provenance(
                r#"Unknown citation tokens (not in evidence): ["q.rs:7"]"#
            )]
        );
    }

    #[test]
    fn empty_evidence_cannot_be_validated() {
        let issues = validate_provenance(
            "VERDICT=TRUE_POSITIVE\nCITATIONS=p.rs:7",
            &AllowedTokenSet::default(),
            &ValidationPolicy::default(),
        );
        assert_eq!(issues, vec![ValidationIssue::provenance(MSG_NO_EVIDENCE_TOKENS)]);
    }

    #[test]
    fn no_citations_is_not_a_provenance_failure() {
        let issues = validate_provenance("VERDICT=TRUE_POSITIVE", &allowed(), &ValidationPolicy::default());
        assert!(issues.is_empty());
    }

    proptest! {
        #[test]
        fn lines_inside_an_evidence_span_always_pass(lo in 1u64..500, len in 0u64..50, pick in 0u64..50) {
            let hi = lo + len;
            let line = lo + pick.min(len);
            let set = AllowedTokenSet::from_blocks(&[format!("hit src/a.rs:{lo}-{hi}")]);
            let cited = [format!("src/a.rs:{line}")];
            prop_assert!(check_cited_tokens(&cited, &set, &ValidationPolicy::default()).is_empty());
            let foreign = [format!("src/b.rs:{line}")];
            prop_assert_eq!(check_cited_tokens(&foreign, &set, &ValidationPolicy::default()).len(), 1);
        }
    }
}
