//! `RUN_MANIFEST.json`: what a run was fed and how it scored.

use crate::error::Result;
use crate::pack::Pack;
use crate::report::{write_text, RunSummary, REPORT_FILE};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

pub const MANIFEST_FILE: &str = "RUN_MANIFEST.json";
pub const MANIFEST_SCHEMA_VERSION: &str = "1.1";
const SHORT_SHA_LEN: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackInfo {
    pub version: u32,
    pub pack_type: String,
    pub engine: String,
    pub questions: usize,
}

/// Git state of the repository holding the pack. Every field is `None` outside a
/// repository or without a `git` binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GitInfo {
    pub root: String,
    pub commit_sha: Option<String>,
    pub commit_short: Option<String>,
    pub branch: Option<String>,
    pub dirty: Option<bool>,
}

impl GitInfo {
    /// Nearest ancestor of `start` holding `.git`, or `start` itself.
    #[must_use]
    pub fn discover(start: &Path) -> Self {
        let root = start
            .ancestors()
            .find(|dir| dir.join(".git").exists())
            .unwrap_or(start)
            .to_path_buf();
        let commit_sha = git_stdout(&root, &["rev-parse", "HEAD"]);
        let commit_short = commit_sha
            .as_ref()
            .map(|sha| sha.chars().take(SHORT_SHA_LEN).collect());
        let branch = git_stdout(&root, &["rev-parse", "--abbrev-ref", "HEAD"]);
        let dirty = git_stdout_raw(&root, &["status", "--porcelain"]).map(|out| !out.trim().is_empty());
        Self {
            root: root.display().to_string(),
            commit_sha,
            commit_short,
            branch,
            dirty,
        }
    }
}

fn git_stdout_raw(dir: &Path, args: &[&str]) -> Option<String> {
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    match Command::new("git").args(args).current_dir(dir).output() {
        Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(_) => None,
        Err(err) => {
            log::debug!("manifest.git.unavailable args={args:?} error={err}");
            None
        }
    }
}

fn git_stdout(dir: &Path, args: &[&str]) -> Option<String> {
    git_stdout_raw(dir, args)
        .map(|out| out.trim().to_string())
        .filter(|out| !out.is_empty())
}

/// One hashed input file. A missing or unreadable file keeps its path and no hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputFile {
    pub label: String,
    pub path: String,
    pub sha256: Option<String>,
}

impl InputFile {
    #[must_use]
    pub fn hash(label: &str, path: &Path) -> Self {
        let sha256 = match sha256_file(path) {
            Ok(digest) => Some(digest),
            Err(err) => {
                log::warn!("manifest.input.unhashed label={label} path={} error={err}", path.display());
                None
            }
        };
        Self {
            label: label.to_string(),
            path: path.display().to_string(),
            sha256,
        }
    }
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut out = String::with_capacity(64);
    for b in hasher.finalize() {
        let _ = write!(out, "{b:02x}");
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestOutputs {
    pub score_ok: usize,
    pub total_questions: usize,
    pub ok_percentage: f64,
    pub output_dir: String,
    pub report: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunManifest {
    pub schema_version: String,
    pub run_id: String,
    /// Seconds since the Unix epoch
    pub generated_at: u64,
    pub runner_version: String,
    pub pack: PackInfo,
    pub repo: GitInfo,
    pub inputs: Vec<InputFile>,
    pub outputs: ManifestOutputs,
}

impl RunManifest {
    /// Build the manifest for a finished (or aborted) run.
    ///
    /// Git state is read from the repository holding the first input, or the
    /// working directory when there are no inputs.
    #[must_use]
    pub fn build(pack: &Pack, summary: &RunSummary, inputs: &[(String, PathBuf)], out_dir: &Path) -> Self {
        let generated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let git_start = inputs
            .first()
            .and_then(|(_, path)| path.parent())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION.to_string(),
            run_id: format!("{generated_at}_{}_{}", pack.engine, pack.pack_type),
            generated_at,
            runner_version: env!("CARGO_PKG_VERSION").to_string(),
            pack: PackInfo {
                version: pack.version,
                pack_type: pack.pack_type.clone(),
                engine: pack.engine.clone(),
                questions: pack.questions.len(),
            },
            repo: GitInfo::discover(&git_start),
            inputs: inputs.iter().map(|(label, path)| InputFile::hash(label, path)).collect(),
            outputs: ManifestOutputs {
                score_ok: summary.passed,
                total_questions: summary.total,
                ok_percentage: ok_percentage(summary.passed, summary.total),
                output_dir: out_dir.display().to_string(),
                report: REPORT_FILE.to_string(),
                aborted: summary.aborted.clone(),
            },
        }
    }

    pub fn write(&self, out_dir: &Path) -> Result<PathBuf> {
        let path = out_dir.join(MANIFEST_FILE);
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        write_text(&path, &text)?;
        Ok(path)
    }
}

/// Percentage rounded to one decimal; zero when there are no questions.
#[must_use]
pub fn ok_percentage(ok: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = 100.0 * ok as f64 / total as f64;
    (pct * 10.0).round() / 10.0
}
