//! Shared primitives for the portal-bridge crates.
//!
//! Everything that crosses a crate boundary lives here: target identities, the
//! login/auth state enums, structured filters, records, candidate operations,
//! the per-target adapter trait and the shared error taxonomy.

pub mod adapter;
pub mod auth;
pub mod error;
pub mod operation;
pub mod query;
pub mod record;
pub mod target;
pub mod timing;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use adapter::TargetAdapter;
pub use auth::{
    AuthState, Locator, LoginAffordances, LoginState, NavProbe, PageSnapshot, SnapshotProbe,
};
pub use error::{AttemptFailure, PortalError};
pub use operation::{
    CandidateOperation, CaptureLayout, CardLayout, CardSlot, FormLayout, OperationCall, PageCall,
    QueryKind, ScriptCall, TableLayout, WaitPolicy,
};
pub use query::{Filter, FilterOperator, FilterSpec, JoinOp};
pub use record::{truncate_chars, FetchResult, Record, RAW_CAPTURE_LIMIT, RAW_KEY};
pub use target::TargetIdentity;
pub use timing::{poll_until, poll_until_some, retry_once_on_timeout};

/// Identifier attached to one live session for log correlation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
