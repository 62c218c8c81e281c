use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portal_core_types::{AuthState, LoginState, SessionId, TargetIdentity};
use serde::{Serialize, Serializer};

/// Tunables for the session lifecycle.
#[derive(Clone, Debug)]
pub struct SessionPolicy {
    pub ttl: Duration,
    pub auto_sso_timeout: Duration,
    pub idp_wait: Duration,
    pub settle_timeout: Duration,
    pub poll_interval: Duration,
    pub navigation_timeout: Duration,
    /// `None` waits for the operator indefinitely (still cancellable).
    pub interactive_timeout: Option<Duration>,
    pub headless: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(8 * 60 * 60),
            auto_sso_timeout: Duration::from_secs(45),
            idp_wait: Duration::from_secs(30),
            settle_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            navigation_timeout: Duration::from_secs(30),
            interactive_timeout: None,
            headless: true,
        }
    }
}

fn as_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

/// Everything known about the live session for one target.
#[derive(Clone, Debug, Serialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub target: TargetIdentity,
    pub auth_state: AuthState,
    /// Profile directory holding the persisted cookies.
    pub credential_handle: Option<PathBuf>,
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(rename = "ttl_secs", serialize_with = "as_secs")]
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub last_classification: Option<LoginState>,
    pub auto_sso_attempts: u32,
    pub failure_reason: Option<String>,
    pub headless: bool,
}

impl SessionRecord {
    pub fn new(target: TargetIdentity, ttl: Duration, headless: bool) -> Self {
        Self {
            session_id: SessionId::new(),
            target,
            auth_state: AuthState::Unauthenticated,
            credential_handle: None,
            last_validated_at: None,
            ttl,
            created_at: Utc::now(),
            last_classification: None,
            auto_sso_attempts: 0,
            failure_reason: None,
            headless,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_state == AuthState::Authenticated
    }

    /// A record that was never validated does not expire on its own.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (self.last_validated_at, chrono::Duration::from_std(self.ttl)) {
            (Some(validated), Ok(ttl)) => now - validated > ttl,
            _ => false,
        }
    }

    /// Every validation starts over; a stale `Authenticated` never survives it.
    pub(crate) fn begin_validation(&mut self) {
        self.auth_state = AuthState::CheckingSavedCredential;
        self.failure_reason = None;
    }

    pub(crate) fn observe(&mut self, state: LoginState) {
        self.last_classification = Some(state);
        if state == LoginState::LoggedIn {
            self.mark_authenticated();
        } else if self.auth_state != AuthState::Failed {
            self.auth_state = state.into();
        }
    }

    pub(crate) fn mark_authenticated(&mut self) {
        self.auth_state = AuthState::Authenticated;
        self.last_validated_at = Some(Utc::now());
        self.failure_reason = None;
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.auth_state = AuthState::Failed;
        self.failure_reason = Some(reason.into());
    }
}
