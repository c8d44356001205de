use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use tempfile::tempdir;

#[allow(deprecated)]
fn grounding() -> Command {
    let mut cmd = Command::cargo_bin("grounding").expect("binary");
    cmd.arg("--quiet");
    cmd
}

#[test]
fn keys_learns_roles_from_sample_payloads() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("rows.json"),
        json!([{"file_path": "src/x.rs", "line_start": 3, "snippet": "unsafe { }"}]).to_string(),
    )
    .unwrap();
    let output = grounding()
        .current_dir(temp.path())
        .args(["keys", "--lenient", "--payload", "rows.json"])
        .output()
        .expect("command run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let snapshot: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    let paths = snapshot["effective_keys"]["path"].as_array().unwrap();
    assert!(paths.contains(&json!("file_path")), "{snapshot}");
    let lines = snapshot["effective_keys"]["line"].as_array().unwrap();
    assert!(lines.contains(&json!("line_start")), "{snapshot}");
}

#[test]
fn keys_without_required_contract_is_fatal() {
    let temp = tempdir().unwrap();
    grounding()
        .current_dir(temp.path())
        .args(["keys", "--engine", "rsqt"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("engine schema contract required"));
}

#[test]
fn render_frames_rows_with_one_cite_anchor() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("unsafe.json"),
        json!([{"file_path": "src/x.rs", "unsafe_block_count": 2}]).to_string(),
    )
    .unwrap();
    grounding()
        .current_dir(temp.path())
        .args(["render", "--qid", "Q1", "--name", "unsafe", "--payload", "unsafe.json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "[Preflight unsafe]:\nCITE=Q1_unsafe.json:1\n[unsafe] 1 results:\n",
        ))
        .stdout(predicate::str::contains("src/x.rs:1"));
}

#[test]
fn render_reports_rows_filtered_to_zero() {
    let temp = tempdir().unwrap();
    let rows: Vec<Value> = (0..3)
        .map(|i| json!({"file_path": format!("tests/case_{i}.rs"), "line_start": 1}))
        .collect();
    fs::write(temp.path().join("scan.json"), Value::Array(rows).to_string()).unwrap();
    fs::write(temp.path().join("transform.toml"), "exclude_test_files = true\n").unwrap();
    grounding()
        .current_dir(temp.path())
        .args([
            "render",
            "--qid",
            "Q2",
            "--name",
            "scan",
            "--payload",
            "scan.json",
            "--transform",
            "transform.toml",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("CITE=Q2_scan.json:1"))
        .stdout(predicate::str::contains(
            "[scan] 0 results (filtered 3 raw hits; filters: exclude_test_files)",
        ))
        .stdout(predicate::str::contains("tests/case_0.rs").not());
}
