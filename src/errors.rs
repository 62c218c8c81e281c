//! The one error object returned across the tool boundary.

use portal_core_types::PortalError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: String,
    pub message: String,
    /// Whether repeating the same call may succeed.
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            retryable,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("invalid_query", message, false)
    }
}

impl From<PortalError> for ToolError {
    fn from(err: PortalError) -> Self {
        let message = err.to_string();
        match err {
            PortalError::Authentication { target, .. } => {
                Self::new("authentication_required", message, false)
                    .with_details(json!({ "target": target }))
            }
            PortalError::OperationExhausted {
                attempts, failures, ..
            } => Self::new("operation_exhausted", message, true)
                .with_details(json!({ "attempts": attempts, "failures": failures })),
            PortalError::QueryBuild(_) => Self::new("invalid_query", message, false),
            PortalError::NavigationTimeout(_) => Self::new("navigation_timeout", message, true),
            PortalError::Browser(_) => Self::new("browser_error", message, true),
            PortalError::Operation(_) => Self::new("operation_failed", message, true),
            PortalError::UnknownTarget(target) => Self::new("unknown_target", message, false)
                .with_details(json!({ "target": target })),
            PortalError::Configuration(_) => Self::new("configuration_error", message, false),
            PortalError::Storage(_) => Self::new("storage_error", message, false),
            PortalError::EmptyResult(_) => Self::new("empty_result", message, false),
        }
    }
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        Self::new("configuration_error", err.to_string(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core_types::AttemptFailure;

    #[test]
    fn exhaustion_keeps_every_failure() {
        let err = ToolError::from(PortalError::OperationExhausted {
            attempts: 2,
            last_error: "b down".into(),
            failures: vec![
                AttemptFailure {
                    candidate: "a".into(),
                    error: "a down".into(),
                },
                AttemptFailure {
                    candidate: "b".into(),
                    error: "b down".into(),
                },
            ],
        });
        assert_eq!(err.code, "operation_exhausted");
        assert!(err.retryable);
        let details = err.details.unwrap();
        assert_eq!(details["attempts"], 2);
        assert_eq!(details["failures"][1]["candidate"], "b");
    }

    #[test]
    fn authentication_is_not_retryable_and_serializes_flat() {
        let err = ToolError::from(PortalError::authentication("acme.service-now.com", "declined"));
        assert_eq!(err.code, "authentication_required");
        assert!(!err.retryable);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["details"]["target"], "acme.service-now.com");
        assert!(value["message"].as_str().unwrap().contains("declined"));

        let plain = serde_json::to_value(ToolError::invalid_argument("bad")).unwrap();
        assert!(plain.get("details").is_none());
    }
}
