use serde::{Deserialize, Serialize};
use std::fmt;

/// Which check produced a [`ValidationIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Schema,
    RequiredKey,
    Provenance,
    PathGate,
    QuestionValidator,
    Advice,
}

impl IssueKind {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Provenance => "Citation provenance: ",
            Self::PathGate => "Path gates: ",
            Self::Schema | Self::RequiredKey | Self::QuestionValidator | Self::Advice => "",
        }
    }
}

/// A tagged, human-readable reason that an answer failed a gate.
///
/// The rendered form (prefix + message) is what gets fed back to the model on retry
/// and what appears in reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(IssueKind::Schema, message)
    }

    pub fn provenance(message: impl Into<String>) -> Self {
        Self::new(IssueKind::Provenance, message)
    }

    pub fn path_gate(message: impl Into<String>) -> Self {
        Self::new(IssueKind::PathGate, message)
    }

    pub fn advice(message: impl Into<String>) -> Self {
        Self::new(IssueKind::Advice, message)
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPhase {
    AdaptiveRerun,
    SchemaRetry,
    DeterministicRepair,
    AdviceRetry,
}

impl fmt::Display for RetryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AdaptiveRerun => "adaptive_rerun",
            Self::SchemaRetry => "schema_retry",
            Self::DeterministicRepair => "deterministic_repair",
            Self::AdviceRetry => "advice_retry",
        };
        f.write_str(name)
    }
}

/// One rung of the retry ladder together with the issues that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub ordinal: usize,
    pub phase: RetryPhase,
    pub issues: Vec<ValidationIssue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_gate_family() {
        assert_eq!(
            ValidationIssue::provenance(r#"Unknown citation tokens (not in evidence): ["q.rs:7"]"#)
                .to_string(),
            r#"Citation provenance: Unknown citation tokens (not in evidence): ["q.rs:7"]"#
        );
        assert_eq!(
            ValidationIssue::schema("VERDICT must appear exactly once").to_string(),
            "VERDICT must appear exactly once"
        );
    }

    #[test]
    fn retry_phase_display_matches_serde_tag() {
        let json = serde_json::to_string(&RetryPhase::SchemaRetry).unwrap();
        assert_eq!(json, format!("\"{}\"", RetryPhase::SchemaRetry));
    }
}
