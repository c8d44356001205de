//! `REPORT.md` and `RUN_SUMMARY.json`.

use crate::error::{OrchestratorError, Result};
use crate::ledger::RetryCounts;
use crate::pipeline::QuestionOutcome;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "REPORT.md";
pub const SUMMARY_FILE: &str = "RUN_SUMMARY.json";
pub const KEY_MAP_FILE: &str = "EVIDENCE_KEY_MAP.json";

/// Markdown lines accumulated over a run.
///
/// The report is flushed to disk at the end of a run and before every fatal abort,
/// so a failed run always leaves what it had.
#[derive(Debug, Clone)]
pub struct RunReport {
    out_dir: PathBuf,
    lines: Vec<String>,
}

impl RunReport {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            lines: Vec::new(),
        }
    }

    pub fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn extend<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
    }

    /// Blank line, bold heading, blank line.
    pub fn section(&mut self, title: &str) {
        self.lines.push(String::new());
        self.lines.push(format!("**{title}:**"));
        self.lines.push(String::new());
    }

    #[must_use]
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.out_dir.join(REPORT_FILE)
    }

    /// Write `REPORT.md` with everything collected so far.
    pub fn flush(&self) -> Result<PathBuf> {
        let path = self.path();
        write_text(&path, &self.text())?;
        log::info!("report.flushed path={} lines={}", path.display(), self.lines.len());
        Ok(path)
    }
}

/// Machine-readable outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub pack_type: String,
    pub engine: String,
    pub mission: bool,
    pub total: usize,
    pub passed: usize,
    pub retries: RetryCounts,
    pub fatal_contract_issues: Vec<String>,
    pub fatal_advice_issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub questions: Vec<QuestionOutcome>,
}

impl RunSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.fatal_contract_issues.is_empty() && self.fatal_advice_issues.is_empty()
    }

    pub fn write(&self, out_dir: &Path) -> Result<PathBuf> {
        let path = out_dir.join(SUMMARY_FILE);
        write_text(&path, &serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).map_err(|e| OrchestratorError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn flush_writes_every_line() {
        let dir = TempDir::new().unwrap();
        let mut report = RunReport::new(dir.path());
        report.line("# run");
        report.section("Answer");
        report.extend(["VERDICT=X", "CITATIONS=a.rs:1"]);
        let path = report.flush().unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "# run\n\n**Answer:**\n\nVERDICT=X\nCITATIONS=a.rs:1\n");
    }
}
