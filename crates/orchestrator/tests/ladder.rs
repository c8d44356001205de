use grounding_evidence::{CmdOutput, PreflightRunner};
use grounding_gates::{validate_schema, ValidationPolicy};
use grounding_keys::{DiscoveryPolicy, KeyRegistry};
use grounding_orchestrator::{
    AnswerSource, DispatchPhase, OrchestratorError, Pack, ReplayBackend, Runner, RunnerPolicy,
    SynthesisSource, SynthesizerRegistry, MANIFEST_FILE, REPORT_FILE, SUMMARY_FILE,
};
use grounding_protocol::RetryPhase;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tempfile::TempDir;

const GOOD_ANSWER: &str = "VERDICT=TRUE_POSITIVE\nCITATIONS=Q1_unsafe.json:1\n\nsrc/x.rs has 2 unsafe blocks";

#[derive(Default)]
struct ScriptedRunner {
    outputs: HashMap<String, Value>,
}

impl ScriptedRunner {
    fn with(mut self, cmd: &str, stdout: Value) -> Self {
        self.outputs.insert(cmd.to_string(), stdout);
        self
    }

    fn unsafe_scan() -> Self {
        Self::default().with("rsqt unsafe", json!([{"file_path": "src/x.rs", "unsafe_block_count": 2}]))
    }
}

impl PreflightRunner for ScriptedRunner {
    fn run(&mut self, argv: &[String]) -> std::io::Result<CmdOutput> {
        let key = argv.join(" ");
        let stdout = self
            .outputs
            .get(&key)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, key))?;
        Ok(CmdOutput {
            argv: argv.to_vec(),
            returncode: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }
}

const UNSAFE_STEP: &str = r#"
[[questions.preflight]]
name = "unsafe"
cmd = ["rsqt", "unsafe"]
"#;

fn pack(pack_type: &str, question_extra: &str) -> Pack {
    pack_with_steps(pack_type, question_extra, UNSAFE_STEP)
}

fn pack_with_steps(pack_type: &str, question_extra: &str, steps: &str) -> Pack {
    let text = format!(
        r#"
version = 1
pack_type = "{pack_type}"
engine = "test"
response_schema = "VERDICT=TRUE_POSITIVE|FALSE_POSITIVE|INDETERMINATE\nCITATIONS=path:line(-line), ..."

[defaults]
chat_top_k = 12

[[questions]]
id = "Q1"
title = "Unsafe blocks"
category = "safety"
question = "Which files contain unsafe blocks?"
{question_extra}
{steps}"#
    );
    Pack::from_toml_str(&text).unwrap()
}

fn replay(answers: &[&str]) -> ReplayBackend {
    let mut map = BTreeMap::new();
    map.insert("Q1".to_string(), answers.iter().map(|a| a.to_string()).collect());
    ReplayBackend::new(map)
}

fn runner(pack: Pack, policy: RunnerPolicy, dir: &TempDir) -> Runner {
    let registry = KeyRegistry::new(DiscoveryPolicy::lenient(), "test");
    Runner::new(pack, policy, registry, dir.path()).unwrap()
}

#[test]
fn artifact_cited_answer_passes_with_zero_retries() {
    let dir = TempDir::new().unwrap();
    let mut backend = replay(&[GOOD_ANSWER]);
    let summary = runner(pack("audit", ""), RunnerPolicy::default(), &dir)
        .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
        .unwrap();

    let outcome = &summary.questions[0];
    assert!(outcome.passed, "{:?}", outcome.issues);
    assert_eq!(outcome.retries.total(), 0);
    assert!(outcome.ledger.is_empty());
    assert_eq!(outcome.autocompleted, vec!["src/x.rs:1".to_string()]);
    assert_eq!(outcome.source, AnswerSource::Model);
    assert_eq!(outcome.expected_verdict_match, None);
    assert_eq!(backend.calls().len(), 1);
    assert!(backend.calls()[0].prompt.contains("CITE=Q1_unsafe.json:1"));

    assert!(dir.path().join(REPORT_FILE).exists());
    assert!(dir.path().join(SUMMARY_FILE).exists());
    assert!(dir.path().join("Q1_unsafe.json").exists());
    assert!(dir.path().join("Q1_chat.json").exists());
}

#[test]
fn retry_on_schema_fail_without_attempts_never_retries() {
    let dir = TempDir::new().unwrap();
    let extra = r#"
[questions.chat]
retry_on_schema_fail = true
"#;
    let mut backend = replay(&["VERDICT=MAYBE\nCITATIONS=Q1_unsafe.json:1"]);
    let summary = runner(pack("audit", extra), RunnerPolicy::default(), &dir)
        .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
        .unwrap();

    let outcome = &summary.questions[0];
    assert!(!outcome.passed);
    assert_eq!(outcome.retries.schema_retries, 0);
    assert_eq!(backend.calls().len(), 1);
}

#[test]
fn expected_verdict_agreement_is_recorded_without_gating() {
    for (expected, matched) in [("true_positive", true), ("FALSE_POSITIVE", false)] {
        let dir = TempDir::new().unwrap();
        let mut backend = replay(&[GOOD_ANSWER]);
        let extra = format!("expected_verdict = \"{expected}\"");
        let summary = runner(pack("audit", &extra), RunnerPolicy::default(), &dir)
            .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
            .unwrap();

        let outcome = &summary.questions[0];
        assert_eq!(outcome.expected_verdict_match, Some(matched));
        assert!(outcome.passed, "{:?}", outcome.issues);
        let report = std::fs::read_to_string(dir.path().join(REPORT_FILE)).unwrap();
        assert_eq!(report.contains("Expected verdict FALSE_POSITIVE, answer gave TRUE_POSITIVE"), !matched);
    }
}

#[test]
fn run_manifest_records_input_hashes_and_score() {
    let inputs_dir = TempDir::new().unwrap();
    let pack_file = inputs_dir.path().join("pack.toml");
    std::fs::write(&pack_file, "version = 1\n").unwrap();
    let policy_file = inputs_dir.path().join("policy.toml");
    let dir = TempDir::new().unwrap();
    let mut backend = replay(&[GOOD_ANSWER]);
    runner(pack("audit", ""), RunnerPolicy::default(), &dir)
        .with_manifest_inputs(vec![
            ("pack".to_string(), pack_file.clone()),
            ("policy".to_string(), policy_file),
        ])
        .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
        .unwrap();

    let text = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
    let manifest: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(manifest["schema_version"], "1.1");
    assert_eq!(manifest["pack"]["pack_type"], "audit");
    assert_eq!(manifest["pack"]["questions"], 1);
    let expected: String = Sha256::digest(b"version = 1\n").iter().map(|b| format!("{b:02x}")).collect();
    assert_eq!(manifest["inputs"][0]["label"], "pack");
    assert_eq!(manifest["inputs"][0]["sha256"], expected.as_str());
    // The policy file was never written.
    assert_eq!(manifest["inputs"][1]["sha256"], Value::Null);
    assert_eq!(manifest["outputs"]["score_ok"], 1);
    assert_eq!(manifest["outputs"]["total_questions"], 1);
    assert_eq!(manifest["outputs"]["ok_percentage"], 100.0);
    assert!(manifest["run_id"].as_str().unwrap().ends_with("_test_audit"));
    assert!(manifest["repo"].get("commit_sha").is_some());
}

#[test]
fn repair_satisfies_schema_after_every_retry_fails() {
    let dir = TempDir::new().unwrap();
    let extra = r#"
[questions.chat]
strict_response_template = "VERDICT=<TRUE_POSITIVE|FALSE_POSITIVE|INDETERMINATE>\nCITATIONS=<path:line>"
schema_retry_attempts = 2
"#;
    let mut backend = replay(&["VERDICT=TRUE_POSITIVE\nCITATIONS=see the code\n\n## Citations:\nall good"]);
    let summary = runner(pack("audit", extra), RunnerPolicy::default(), &dir)
        .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
        .unwrap();

    let outcome = &summary.questions[0];
    let phases: Vec<RetryPhase> = outcome.ledger.attempts().iter().map(|a| a.phase).collect();
    assert_eq!(
        phases,
        vec![RetryPhase::SchemaRetry, RetryPhase::SchemaRetry, RetryPhase::DeterministicRepair]
    );
    assert_eq!(outcome.retries.schema_retries, 2);
    assert_eq!(outcome.retries.deterministic_repairs, 1);
    assert_eq!(outcome.repair_notes, vec!["repaired_citations".to_string()]);
    assert!(validate_schema(&outcome.answer, &ValidationPolicy::default()).is_empty());
    assert!(outcome.answer.starts_with("VERDICT=TRUE_POSITIVE\nCITATIONS=Q1_unsafe.json:1, src/x.rs:1"));
    assert!(!outcome.answer.contains("Citations:"), "{}", outcome.answer);
    assert!(outcome.passed, "{:?}", outcome.issues);

    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].phase, DispatchPhase::SchemaRetry);
    assert!(calls[1].prompt.contains("RETRY_ATTEMPT=1/2"));
    assert!(calls[2].prompt.contains("RETRY_ATTEMPT=2/2"));
    assert!(calls[0].prompt.starts_with("OUTPUT CONTRACT OVERRIDE:"));
}

#[test]
fn adaptive_rerun_widens_top_k_once() {
    let dir = TempDir::new().unwrap();
    let policy = RunnerPolicy {
        adaptive_top_k: true,
        chat_top_k_initial: 4,
        ..RunnerPolicy::default()
    };
    let mut backend = replay(&["VERDICT=MAYBE\nCITATIONS=Q1_unsafe.json:1", GOOD_ANSWER]);
    let summary = runner(pack("audit", ""), policy, &dir)
        .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
        .unwrap();

    let outcome = &summary.questions[0];
    assert_eq!(outcome.retries.adaptive_reruns, 1);
    assert_eq!(outcome.top_k, 12);
    assert!(outcome.passed);
    let top_ks: Vec<usize> = backend.calls().iter().map(|c| c.top_k).collect();
    assert_eq!(top_ks, vec![4, 12]);
    assert!(backend.calls()[1]
        .prompt
        .contains("Validation issues to fix in this rerun:\n- Invalid VERDICT 'MAYBE'"));
}

#[test]
fn empty_evidence_aborts_after_flushing_the_report() {
    let dir = TempDir::new().unwrap();
    let mut backend = replay(&[GOOD_ANSWER]);
    let mut preflight = ScriptedRunner::default().with("rsqt unsafe", json!([]));
    let err = runner(pack("audit", ""), RunnerPolicy::default(), &dir)
        .run(&mut backend, &mut preflight)
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::EmptyEvidence { ref qid } if qid == "Q1"));
    assert!(backend.calls().is_empty());
    let report = std::fs::read_to_string(dir.path().join(REPORT_FILE)).unwrap();
    assert!(report.contains("Strict evidence gate"));
    let summary: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap()).unwrap();
    assert!(summary["aborted"].as_str().unwrap().starts_with("Q1: No usable deterministic evidence"));
}

#[test]
fn lenient_empty_evidence_answers_not_found_without_a_model_call() {
    let dir = TempDir::new().unwrap();
    let mut policy = RunnerPolicy::default();
    policy.evidence_presence_gate.fail_on_empty_evidence = false;
    let mut pack = pack("audit", "");
    pack.validation.fail_on_missing_citations = false;

    let mut backend = replay(&[]);
    let mut preflight = ScriptedRunner::default().with("rsqt unsafe", json!([]));
    let summary = runner(pack, policy, &dir).run(&mut backend, &mut preflight).unwrap();

    let outcome = &summary.questions[0];
    assert_eq!(outcome.source, AnswerSource::EvidenceEmpty);
    assert!(outcome.answer.starts_with("**NOT FOUND**"));
    assert!(!outcome.passed);
    assert!(backend.calls().is_empty());
}

#[test]
fn filtered_to_zero_is_fatal_by_default() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<Value> = (0..25)
        .map(|i| json!({"file_path": format!("tests/case_{i}.rs"), "line_start": 1}))
        .collect();
    let steps = r#"
[[questions.preflight]]
name = "tests_only"
cmd = ["rsqt", "tests"]

[questions.preflight.transform]
exclude_test_files = true
"#;
    let pack = pack_with_steps("audit", "", steps);
    let mut preflight = ScriptedRunner::default().with("rsqt tests", Value::Array(rows));
    let mut backend = replay(&[GOOD_ANSWER]);

    let err = runner(pack, RunnerPolicy::default(), &dir)
        .run(&mut backend, &mut preflight)
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::FilteredToZero { .. }), "{err}");
    assert!(err.to_string().contains("tests_only(25)"), "{err}");
    assert!(backend.calls().is_empty());
    assert!(dir.path().join(REPORT_FILE).exists());
}

#[test]
fn deterministic_questions_never_call_the_model() {
    let dir = TempDir::new().unwrap();
    let mut synthesizers = SynthesizerRegistry::new();
    synthesizers.register("Q1", |input| {
        let rows = input.evidence.rows_by_step.get("unsafe").map_or(0, Vec::len);
        Some(format!(
            "VERDICT=TRUE_POSITIVE\nCITATIONS=Q1_unsafe.json:1\n\nunsafe rows: {rows}\n"
        ))
    });
    let mut backend = replay(&[]);
    let summary = runner(pack("audit", "answer_mode = \"deterministic\""), RunnerPolicy::default(), &dir)
        .with_synthesizers(synthesizers)
        .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
        .unwrap();

    let outcome = &summary.questions[0];
    assert_eq!(outcome.source, AnswerSource::Synthesized(SynthesisSource::Registered));
    assert!(outcome.answer.contains("unsafe rows: 1"));
    assert!(outcome.passed, "{:?}", outcome.issues);
    assert!(backend.calls().is_empty());
}

#[test]
fn unregistered_deterministic_question_gets_the_seed_answer() {
    let dir = TempDir::new().unwrap();
    let mut backend = replay(&[]);
    let summary = runner(pack("audit", "answer_mode = \"deterministic\""), RunnerPolicy::default(), &dir)
        .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
        .unwrap();

    let outcome = &summary.questions[0];
    assert_eq!(outcome.source, AnswerSource::Synthesized(SynthesisSource::Seed));
    assert!(outcome
        .answer
        .starts_with("VERDICT=INDETERMINATE\nCITATIONS=Q1_unsafe.json:1, src/x.rs:1\n\nDETERMINISTIC_NOTE="));
    assert!(outcome.passed, "{:?}", outcome.issues);
}

#[test]
fn mission_advice_issues_fail_the_run_after_one_retry() {
    let dir = TempDir::new().unwrap();
    let mut backend = replay(&[GOOD_ANSWER, "ISSUE_1=looks good", "ISSUE_1=great job"]);
    let err = runner(pack("mission_audit", "advice_mode = \"llm\""), RunnerPolicy::default(), &dir)
        .run(&mut backend, &mut ScriptedRunner::unsafe_scan())
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::AdviceFatal { .. }), "{err}");
    let phases: Vec<DispatchPhase> = backend.calls().iter().map(|c| c.phase).collect();
    assert_eq!(
        phases,
        vec![DispatchPhase::Primary, DispatchPhase::Advice, DispatchPhase::AdviceRetry]
    );
    assert!(backend.calls()[2].prompt.starts_with("ADVICE RETRY MODE:"));

    let summary: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap()).unwrap();
    assert!(!summary["fatal_advice_issues"].as_array().unwrap().is_empty());
    assert_eq!(summary["retries"]["advice_retries"], json!(1));
}

#[test]
fn mission_pack_requires_llm_advice_on_every_question() {
    let dir = TempDir::new().unwrap();
    let registry = KeyRegistry::new(DiscoveryPolicy::lenient(), "test");
    let err = Runner::new(pack("mission_audit", ""), RunnerPolicy::default(), registry, dir.path())
        .err()
        .unwrap();
    assert!(err.to_string().contains("requires advice_mode=llm"), "{err}");
}

#[test]
fn second_run_is_served_from_the_artifact_cache() {
    let dir = TempDir::new().unwrap();
    runner(pack("audit", ""), RunnerPolicy::default(), &dir)
        .run(&mut replay(&[GOOD_ANSWER]), &mut ScriptedRunner::unsafe_scan())
        .unwrap();
    let summary = runner(pack("audit", ""), RunnerPolicy::default(), &dir)
        .run(&mut replay(&[GOOD_ANSWER]), &mut ScriptedRunner::default())
        .unwrap();
    assert_eq!(summary.questions[0].cache_hits, 1);
}
