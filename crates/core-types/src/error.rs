use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One failed candidate, kept so the winner never hides what was tried before it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub candidate: String,
    pub error: String,
}

/// Error taxonomy shared by the session and retrieval layers.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PortalError {
    #[error("authentication required for {target}: {reason}")]
    Authentication { target: String, reason: String },
    #[error("all {attempts} candidate operation(s) failed; last error: {last_error}")]
    OperationExhausted {
        attempts: usize,
        last_error: String,
        failures: Vec<AttemptFailure>,
    },
    #[error("invalid query: {0}")]
    QueryBuild(String),
    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),
    #[error("browser failure: {0}")]
    Browser(String),
    #[error("operation failed: {0}")]
    Operation(String),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("credential storage error: {0}")]
    Storage(String),
    #[error("no records returned for {0}")]
    EmptyResult(String),
}

impl PortalError {
    pub fn authentication(target: impl ToString, reason: impl Into<String>) -> Self {
        Self::Authentication {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for structured tool errors.
    pub fn code(&self) -> &'static str {
        match self {
            PortalError::Authentication { .. } => "authentication_error",
            PortalError::OperationExhausted { .. } => "operation_exhausted",
            PortalError::QueryBuild(_) => "query_build_error",
            PortalError::NavigationTimeout(_) => "navigation_timeout",
            PortalError::Browser(_) => "browser_error",
            PortalError::Operation(_) => "operation_error",
            PortalError::UnknownTarget(_) => "unknown_target",
            PortalError::Configuration(_) => "configuration_error",
            PortalError::Storage(_) => "storage_error",
            PortalError::EmptyResult(_) => "empty_result",
        }
    }

    /// Whether the caller can reasonably try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PortalError::NavigationTimeout(_)
                | PortalError::Browser(_)
                | PortalError::OperationExhausted { .. }
        )
    }
}
