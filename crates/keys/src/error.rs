use thiserror::Error;

/// Result type for key discovery
pub type Result<T> = std::result::Result<T, KeyError>;

/// Errors raised while building the effective key set
#[derive(Error, Debug)]
pub enum KeyError {
    /// The schema contract document is not shaped like a contract
    #[error("Invalid schema contract: {0}")]
    InvalidContract(String),

    /// Discovery finished but the run must not proceed
    #[error("Fatal key discovery error: {0}")]
    Fatal(String),

    /// Contract or payload JSON failed to parse
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KeyError {
    /// Create an invalid contract error
    pub fn invalid_contract(msg: impl Into<String>) -> Self {
        Self::InvalidContract(msg.into())
    }

    /// Create a fatal discovery error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}
