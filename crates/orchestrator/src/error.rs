use grounding_evidence::EvidenceError;
use grounding_gates::GateError;
use grounding_keys::KeyError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for orchestration
pub type Result<T> = std::result::Result<T, OrchestratorError>;

pub const EMPTY_EVIDENCE_MESSAGE: &str = "No usable deterministic evidence extracted for question (all preflight outputs empty or filtered_to_zero); strict evidence gate requires evidence-backed analysis and aborts this run.";

/// Errors that end a question or the whole run
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Strict evidence gate: the question produced nothing citeable
    #[error("{qid}: {EMPTY_EVIDENCE_MESSAGE}")]
    EmptyEvidence { qid: String },

    /// Starvation gate: high raw-hit steps were filtered down to nothing
    #[error("{qid}: {source}")]
    FilteredToZero {
        qid: String,
        #[source]
        source: EvidenceError,
    },

    /// Advice issues survived every retry while the pack runs in mission mode
    #[error("Advice quality gate failed in mission mode ({} issue(s)): {}", .issues.len(), .issues.join("; "))]
    AdviceFatal { issues: Vec<String> },

    /// Schema or provenance issues survived the ladder while citations are mandatory
    #[error("Answer contract failed ({} issue(s)): {}", .issues.len(), .issues.join("; "))]
    ContractFailed { issues: Vec<String> },

    /// The model backend did not produce an answer
    #[error("Model backend failed during {phase}: {message}")]
    Backend { phase: String, message: String },

    /// The question pack is malformed
    #[error("Invalid question pack: {0}")]
    InvalidPack(String),

    /// The runner policy is malformed
    #[error("Invalid runner policy: {0}")]
    InvalidPolicy(String),

    #[error("Key discovery error: {0}")]
    Keys(#[from] KeyError),

    #[error("Evidence error: {0}")]
    Evidence(#[from] EvidenceError),

    #[error("Gate configuration error: {0}")]
    Gates(#[from] GateError),

    /// Report or artifact write failure
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Create a backend error for dispatch `phase`
    pub fn backend(phase: impl ToString, message: impl ToString) -> Self {
        Self::Backend {
            phase: phase.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid pack error
    pub fn invalid_pack(msg: impl Into<String>) -> Self {
        Self::InvalidPack(msg.into())
    }

    /// Create an invalid policy error
    pub fn invalid_policy(msg: impl Into<String>) -> Self {
        Self::InvalidPolicy(msg.into())
    }

    /// Wrap an IO error with the path it concerns
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Run-level gate failures, as opposed to configuration or IO problems.
    #[must_use]
    pub fn is_gate_abort(&self) -> bool {
        matches!(
            self,
            Self::EmptyEvidence { .. }
                | Self::FilteredToZero { .. }
                | Self::AdviceFatal { .. }
                | Self::ContractFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_evidence_names_the_question() {
        let err = OrchestratorError::EmptyEvidence { qid: "Q7".into() };
        assert!(err.to_string().starts_with("Q7: No usable deterministic evidence"));
        assert!(err.is_gate_abort());
        assert!(!OrchestratorError::invalid_pack("x").is_gate_abort());
    }
}
