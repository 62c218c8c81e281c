//! Per-target browser profiles that carry SSO cookies across restarts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use portal_core_types::{PortalError, SessionId, TargetIdentity};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const MARKER_FILE: &str = "session.json";

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode session marker: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CredentialStoreError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<CredentialStoreError> for PortalError {
    fn from(err: CredentialStoreError) -> Self {
        PortalError::Storage(err.to_string())
    }
}

/// Location of one target's persisted credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialHandle {
    pub profile_dir: PathBuf,
    pub marker: PathBuf,
}

/// Contents of the marker file written on every successful authentication.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMarker {
    pub target: String,
    pub session_id: SessionId,
    pub authenticated_at: DateTime<Utc>,
    pub headless: bool,
}

#[derive(Clone, Debug)]
pub struct CredentialStore {
    state_dir: PathBuf,
}

impl CredentialStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// `<config dir>/portal-bridge`, or `./.portal-bridge` when the platform has none.
    pub fn default_state_dir() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("portal-bridge"))
            .unwrap_or_else(|| PathBuf::from(".portal-bridge"))
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn handle_for(&self, target: &TargetIdentity) -> CredentialHandle {
        let profile_dir = self
            .state_dir
            .join("profiles")
            .join(target.storage_key());
        let marker = profile_dir.join(MARKER_FILE);
        CredentialHandle {
            profile_dir,
            marker,
        }
    }

    /// Creates the profile directory (owner-only) and returns its handle.
    pub fn prepare(&self, target: &TargetIdentity) -> Result<CredentialHandle, CredentialStoreError> {
        let handle = self.handle_for(target);
        fs::create_dir_all(&handle.profile_dir)
            .map_err(|err| CredentialStoreError::io("create", &handle.profile_dir, err))?;
        restrict(&handle.profile_dir, 0o700)?;
        Ok(handle)
    }

    /// Age of the marker, `None` when no credential was ever persisted.
    pub fn marker_age(&self, target: &TargetIdentity) -> Option<Duration> {
        let modified = fs::metadata(self.handle_for(target).marker)
            .and_then(|meta| meta.modified())
            .ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    pub fn is_fresh(&self, target: &TargetIdentity, ttl: Duration) -> bool {
        self.marker_age(target).map(|age| age < ttl).unwrap_or(false)
    }

    /// Deletes the whole profile when its marker is older than `ttl`. Returns
    /// whether anything was removed.
    pub fn purge_if_expired(
        &self,
        target: &TargetIdentity,
        ttl: Duration,
    ) -> Result<bool, CredentialStoreError> {
        match self.marker_age(target) {
            Some(age) if age >= ttl => {
                info!(
                    target: "session-center",
                    target_key = %target.key(),
                    age_secs = age.as_secs(),
                    "persisted credential expired; discarding profile"
                );
                self.delete(target)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn persist(
        &self,
        target: &TargetIdentity,
        marker: &SessionMarker,
    ) -> Result<CredentialHandle, CredentialStoreError> {
        let handle = self.prepare(target)?;
        let body = serde_json::to_vec_pretty(marker)?;
        fs::write(&handle.marker, body)
            .map_err(|err| CredentialStoreError::io("write", &handle.marker, err))?;
        restrict(&handle.marker, 0o600)?;
        debug!(target: "session-center", marker = %handle.marker.display(), "session marker written");
        Ok(handle)
    }

    pub fn load_marker(&self, target: &TargetIdentity) -> Option<SessionMarker> {
        let raw = fs::read(self.handle_for(target).marker).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Removes the profile directory. Missing directories are not an error.
    pub fn delete(&self, target: &TargetIdentity) -> Result<(), CredentialStoreError> {
        let handle = self.handle_for(target);
        match fs::remove_dir_all(&handle.profile_dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CredentialStoreError::io("remove", &handle.profile_dir, err)),
        }
    }
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<(), CredentialStoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| CredentialStoreError::io("chmod", path, err))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<(), CredentialStoreError> {
    Ok(())
}
