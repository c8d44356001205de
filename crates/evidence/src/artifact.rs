use crate::error::{EvidenceError, Result};
use crate::rows::FilteredPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Captured result of one preflight invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    pub argv: Vec<String>,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Seam for executing preflight commands.
///
/// The engine never spawns processes itself; the CLI supplies a process runner and
/// tests supply canned outputs.
pub trait PreflightRunner {
    fn run(&mut self, argv: &[String]) -> std::io::Result<CmdOutput>;
}

/// On-disk record of one preflight step, `{qid}_{step}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightArtifact {
    #[serde(rename = "_sig")]
    pub signature: String,
    pub argv: Vec<String>,
    pub returncode: i32,
    pub stdout: Value,
    #[serde(default)]
    pub stderr: String,

    /// Unfiltered stdout, kept once filters have rewritten `stdout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_raw: Option<Value>,

    #[serde(rename = "_stdout_filtered", default, skip_serializing_if = "is_false")]
    pub stdout_filtered: bool,

    #[serde(
        rename = "_stdout_rows_before_filter_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rows_before_filter: Option<usize>,

    #[serde(
        rename = "_stdout_rows_after_filter_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rows_after_filter: Option<usize>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PreflightArtifact {
    /// Build an artifact from a finished command. JSON-looking stdout is parsed.
    pub fn from_output(signature: impl Into<String>, output: CmdOutput) -> Self {
        let stdout = parse_stdout(&output.stdout);
        Self {
            signature: signature.into(),
            argv: output.argv,
            returncode: output.returncode,
            stdout,
            stderr: output.stderr,
            stdout_raw: None,
            stdout_filtered: false,
            rows_before_filter: None,
            rows_after_filter: None,
        }
    }

    /// A copy of this artifact whose `stdout` is `payload.filtered`, with the raw
    /// payload and row counts recorded beside it.
    #[must_use]
    pub fn with_filtered(&self, payload: FilteredPayload) -> Self {
        Self {
            stdout: payload.filtered,
            stdout_raw: Some(payload.raw),
            stdout_filtered: true,
            rows_before_filter: Some(payload.rows_before),
            rows_after_filter: Some(payload.rows_after),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.returncode == 0
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|err| EvidenceError::io(path, err))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write as indented JSON with a trailing newline.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| EvidenceError::io(parent, err))?;
        }
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        std::fs::write(path, bytes).map_err(|err| EvidenceError::io(path, err))
    }
}

/// Stdout starting with `{` or `[` is stored as JSON when it parses, as text otherwise.
#[must_use]
pub fn parse_stdout(stdout: &str) -> Value {
    let trimmed = stdout.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(stdout) {
            return parsed;
        }
    }
    Value::String(stdout.to_string())
}

// Field order is alphabetical so the serialized form is canonical.
#[derive(Serialize)]
struct SignatureDoc<'a> {
    argv: &'a [String],
    inputs: Vec<SignatureInput>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum SignatureInput {
    Present {
        mtime_ns: u64,
        path: String,
        size: u64,
    },
    Missing {
        missing: bool,
        path: String,
    },
}

/// Content-address of a preflight invocation: hex sha256 over the exact argv and the
/// mtime/size of every input file.
pub fn artifact_signature(argv: &[String], inputs: &[PathBuf]) -> Result<String> {
    let inputs = inputs
        .iter()
        .map(|path| {
            let display = path.display().to_string();
            match std::fs::metadata(path) {
                Ok(meta) => {
                    let mtime_ns = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                        .unwrap_or(0);
                    SignatureInput::Present {
                        mtime_ns,
                        path: display,
                        size: meta.len(),
                    }
                }
                Err(_) => SignatureInput::Missing {
                    missing: true,
                    path: display,
                },
            }
        })
        .collect();
    let doc = serde_json::to_string(&SignatureDoc { argv, inputs })?;
    let digest = Sha256::digest(doc.as_bytes());
    Ok(hex_encode_lower(&digest))
}

fn hex_encode_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().saturating_mul(2));
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// How a cached artifact was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHit {
    /// The step's own artifact already carried the signature
    SameFile,
    /// Another step in this run produced the same signature; its file was copied
    Signature,
}

impl CacheHit {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::SameFile => "cached",
            Self::Signature => "cached(sig)",
        }
    }
}

/// Run-scoped artifact store with a signature index.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    out_dir: PathBuf,
    reuse_existing: bool,
    by_signature: HashMap<String, PathBuf>,
}

impl ArtifactCache {
    /// `reuse_existing` allows an artifact left by an earlier run in `out_dir` to be
    /// reused when its signature still matches.
    pub fn new(out_dir: impl Into<PathBuf>, reuse_existing: bool) -> Self {
        Self {
            out_dir: out_dir.into(),
            reuse_existing,
            by_signature: HashMap::new(),
        }
    }

    #[must_use]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    #[must_use]
    pub fn artifact_path(&self, qid: &str, step: &str) -> PathBuf {
        self.out_dir.join(crate::render::artifact_file_name(qid, step))
    }

    /// Find a usable artifact for `signature` at `path`, copying from the signature
    /// index when the path itself is missing. Corrupted files count as misses.
    pub fn lookup(&mut self, path: &Path, signature: &str) -> Option<(PreflightArtifact, CacheHit)> {
        if self.reuse_existing && path.exists() {
            if let Some(artifact) = load_matching(path, signature) {
                self.by_signature.insert(signature.to_string(), path.to_path_buf());
                return Some((artifact, CacheHit::SameFile));
            }
        }
        if path.exists() {
            return None;
        }
        let source = self.by_signature.get(signature)?.clone();
        if !source.exists() {
            return None;
        }
        if let Err(err) = std::fs::copy(&source, path) {
            log::warn!(
                "Preflight cache copy failed {} -> {}: {err}",
                source.display(),
                path.display()
            );
            return None;
        }
        let artifact = load_matching(path, signature)?;
        self.by_signature.insert(signature.to_string(), path.to_path_buf());
        Some((artifact, CacheHit::Signature))
    }

    /// Persist a fresh artifact and index it by signature.
    pub fn store(&mut self, path: &Path, artifact: &PreflightArtifact) -> Result<()> {
        artifact.save(path)?;
        self.by_signature
            .insert(artifact.signature.clone(), path.to_path_buf());
        Ok(())
    }
}

fn load_matching(path: &Path, signature: &str) -> Option<PreflightArtifact> {
    match PreflightArtifact::load(path) {
        Ok(artifact) if artifact.signature == signature => Some(artifact),
        Ok(_) => None,
        Err(err) => {
            log::warn!("Preflight artifact corrupted {}: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn output(stdout: &str) -> CmdOutput {
        CmdOutput {
            argv: vec!["engine".to_string(), "search".to_string()],
            returncode: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn stdout_is_parsed_only_when_json_shaped() {
        assert_eq!(parse_stdout("  [1, 2]"), json!([1, 2]));
        assert_eq!(parse_stdout("{broken"), json!("{broken"));
        assert_eq!(parse_stdout("42"), json!("42"));
    }

    #[test]
    fn signature_tracks_argv_and_inputs() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("index.json");
        std::fs::write(&input, "{}").unwrap();
        let argv = vec!["a".to_string()];

        let first = artifact_signature(&argv, &[input.clone()]).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, artifact_signature(&argv, &[input.clone()]).unwrap());
        assert_ne!(first, artifact_signature(&["b".to_string()], &[input.clone()]).unwrap());

        std::fs::write(&input, "{\"grown\": true}").unwrap();
        assert_ne!(first, artifact_signature(&argv, &[input]).unwrap());

        let missing = artifact_signature(&argv, &[dir.path().join("nope")]).unwrap();
        assert_eq!(missing.len(), 64);
    }

    #[test]
    fn artifact_round_trips_with_bookkeeping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Q1_step.json");
        let mut artifact = PreflightArtifact::from_output("sig", output("[{\"a\": 1}]"));
        artifact.stdout_filtered = true;
        artifact.rows_before_filter = Some(3);
        artifact.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("}\n"));
        assert!(raw.contains("\"_sig\": \"sig\""));
        assert!(raw.contains("\"_stdout_rows_before_filter_count\": 3"));
        assert!(!raw.contains("stdout_raw"));
        assert_eq!(PreflightArtifact::load(&path).unwrap(), artifact);
    }

    #[test]
    fn cache_hits_same_file_then_signature_copy() {
        let dir = TempDir::new().unwrap();
        let mut cache = ArtifactCache::new(dir.path(), true);
        let first = cache.artifact_path("Q1", "scan");
        let artifact = PreflightArtifact::from_output("abc", output("[]"));
        cache.store(&first, &artifact).unwrap();

        let (_, hit) = cache.lookup(&first, "abc").unwrap();
        assert_eq!(hit, CacheHit::SameFile);
        assert!(cache.lookup(&first, "other").is_none());

        let second = cache.artifact_path("Q2", "scan");
        let (copied, hit) = cache.lookup(&second, "abc").unwrap();
        assert_eq!(hit, CacheHit::Signature);
        assert_eq!(copied.signature, "abc");
        assert!(second.exists());
    }

    #[test]
    fn corrupted_artifact_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let mut cache = ArtifactCache::new(dir.path(), true);
        let path = cache.artifact_path("Q1", "scan");
        std::fs::write(&path, "not json").unwrap();
        assert!(cache.lookup(&path, "abc").is_none());
    }

    #[test]
    fn fresh_cache_ignores_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Q1_scan.json");
        PreflightArtifact::from_output("abc", output("[]"))
            .save(&path)
            .unwrap();
        let mut cache = ArtifactCache::new(dir.path(), false);
        assert!(cache.lookup(&path, "abc").is_none());
    }
}
