use std::path::PathBuf;
use thiserror::Error;

/// Result type for evidence operations
pub type Result<T> = std::result::Result<T, EvidenceError>;

/// Errors raised while collecting and shaping preflight evidence
#[derive(Error, Debug)]
pub enum EvidenceError {
    /// A transform or test-path regex does not compile
    #[error("Invalid {context} regex: {pattern:?} ({message})")]
    InvalidRegex {
        context: String,
        pattern: String,
        message: String,
    },

    /// A `group_by_path_top_n.from` points at a missing or later step
    #[error("Preflight transform dependency validation failed: group_by_path_top_n.from must reference a prior step in the same question. {}", .0.join("; "))]
    GroupByDependency(Vec<String>),

    /// High raw-hit steps were filtered down to nothing usable
    #[error("Preflight starvation gate failed: at least one preflight returned high raw-hit volume but filters collapsed to zero usable evidence (threshold={threshold}). This indicates corpus pollution or wrong scope; question execution aborted. Steps: {steps}")]
    FilteredToZero { threshold: usize, steps: String },

    /// A preflight command could not be started
    #[error("Preflight `{step}` failed to start: {message}")]
    Preflight { step: String, message: String },

    /// Artifact read/write failure
    #[error("Artifact IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact JSON failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvidenceError {
    /// Create an invalid regex error
    pub fn invalid_regex(
        context: impl Into<String>,
        pattern: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::InvalidRegex {
            context: context.into(),
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    /// Create a preflight launch error
    pub fn preflight(step: impl Into<String>, message: impl ToString) -> Self {
        Self::Preflight {
            step: step.into(),
            message: message.to_string(),
        }
    }

    /// Wrap an IO error with the artifact path it concerns
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
