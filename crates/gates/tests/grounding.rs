use grounding_gates::{
    autocomplete_citations, check_answer, AllowedTokenSet, ValidationPolicy, MSG_NO_EVIDENCE_TOKENS,
};
use grounding_protocol::{IssueKind, ValidationIssue};
use pretty_assertions::assert_eq;

const UNSAFE_BLOCK: &str = "[Preflight unsafe]:\nCITE=Q1_unsafe.json:1\n[unsafe] 1 results:\n  1. src/x.rs:1 | unsafe_block_count=2";

fn rendered(issues: &[ValidationIssue]) -> Vec<String> {
    issues.iter().map(ToString::to_string).collect()
}

#[test]
fn artifact_cited_answer_passes_every_gate() {
    let allowed = AllowedTokenSet::from_blocks(&[UNSAFE_BLOCK]);
    let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS=Q1_unsafe.json:1\n\nsrc/x.rs has 2 unsafe blocks";
    let policy = ValidationPolicy::default();

    let (fixed, added) = autocomplete_citations(answer, &allowed, &policy);
    assert_eq!(added, vec!["src/x.rs:1".to_string()]);
    assert!(check_answer(&fixed, &allowed, &policy).is_empty(), "{fixed}");
}

#[test]
fn path_gates_alone_flag_uncited_body_path() {
    let allowed = AllowedTokenSet::from_blocks(&[UNSAFE_BLOCK]);
    let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS=Q1_unsafe.json:1\n\nsrc/x.rs has 2 unsafe blocks";
    let issues = check_answer(answer, &allowed, &ValidationPolicy::default());
    assert_eq!(
        rendered(&issues),
        vec![r#"Path gates: Gate B (paths must be cited): paths mentioned without matching CITATIONS token: ["src/x.rs"]"#.to_string()]
    );
}

#[test]
fn invented_citation_fails_provenance_and_gate_a() {
    let allowed = AllowedTokenSet::from_blocks(&[UNSAFE_BLOCK]);
    let answer = "VERDICT=FALSE_POSITIVE\nCITATIONS=src/y.rs:3\n\nsrc/y.rs is safe";
    let issues = check_answer(answer, &allowed, &ValidationPolicy::default());
    assert_eq!(
        rendered(&issues),
        vec![
            r#"Citation provenance: Unknown citation tokens (not in evidence): ["src/y.rs:3"]"#.to_string(),
            r#"Path gates: Gate A (no new paths): paths not present in evidence: ["src/y.rs"]"#.to_string(),
        ]
    );
}

#[test]
fn provenance_can_be_disabled() {
    let policy = ValidationPolicy {
        enforce_citations_from_evidence: false,
        enforce_no_new_paths: false,
        enforce_paths_must_be_cited: false,
        ..Default::default()
    };
    let issues = check_answer(
        "VERDICT=INDETERMINATE\nCITATIONS=a.rs:1",
        &AllowedTokenSet::default(),
        &policy,
    );
    assert!(issues.is_empty());
}

#[test]
fn empty_evidence_is_reported_once() {
    let policy = ValidationPolicy {
        enforce_no_new_paths: false,
        ..Default::default()
    };
    let issues = check_answer(
        "VERDICT=INDETERMINATE\nCITATIONS=a.rs:1",
        &AllowedTokenSet::default(),
        &policy,
    );
    assert_eq!(
        issues,
        vec![ValidationIssue::new(IssueKind::Provenance, MSG_NO_EVIDENCE_TOKENS)]
    );
}
