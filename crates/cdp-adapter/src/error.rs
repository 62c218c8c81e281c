use std::fmt;

use portal_core_types::PortalError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories surfaced by the browser layer.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("navigation timed out")]
    NavTimeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("browser launch failed")]
    Launch,
    #[error("script evaluation failed")]
    Script,
    #[error("target element not found")]
    TargetNotFound,
    #[error("page closed")]
    PageClosed,
    #[error("internal error")]
    Internal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn nav_timeout(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::NavTimeout)
            .with_hint(hint)
            .retriable(true)
    }

    pub fn script(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Script).with_hint(hint)
    }
}

impl From<AdapterError> for PortalError {
    fn from(err: AdapterError) -> Self {
        match err.kind {
            AdapterErrorKind::NavTimeout => PortalError::NavigationTimeout(err.to_string()),
            _ => PortalError::Browser(err.to_string()),
        }
    }
}
