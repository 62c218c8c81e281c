//! portal-bridge library
//!
//! Structured queries and record look-ups against SSO-gated portals that only
//! expose a browser front end. [`PortalService`] is the entry point a tool
//! shell calls; the session and retrieval machinery lives in the workspace
//! crates re-exported below.

pub mod config;
pub mod errors;
pub mod service;
pub mod telemetry;

pub use config::{
    BridgeConfig, BrowserSettings, ConfigError, LoggingConfig, QuerySettings, SessionSettings,
    TargetConfig,
};
pub use errors::ToolError;
pub use service::{PortalService, StatusReport, TableQuery, TargetSummary};
pub use telemetry::init_logging;

pub use portal_core_types::{FetchResult, FilterSpec, Record, TargetIdentity};
pub use target_adapters::{
    AdapterKind, ChangeQuery, IncidentQuery, IntentOutcome, TableDescription,
};
