use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading gate configuration. The gates themselves never fail.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration file could not be parsed
    #[error("Invalid {what} config: {message}")]
    Config { what: String, message: String },

    /// Configuration file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GateError>;

impl GateError {
    pub fn config(what: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Config {
            what: what.into(),
            message: err.to_string(),
        }
    }
}
