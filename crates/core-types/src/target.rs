use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::PortalError;

/// Stable key for one remote application instance.
///
/// Two identities are equal when scheme, hostname and port match; the hostname is
/// always stored lower-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetIdentity {
    scheme: String,
    hostname: String,
    port: Option<u16>,
}

impl TargetIdentity {
    /// Accepts a bare hostname (`acme.service-now.com`) or a full URL.
    pub fn parse(address: &str) -> Result<Self, PortalError> {
        let trimmed = address.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(PortalError::Configuration(
                "target address must not be empty".to_string(),
            ));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let url = Url::parse(&candidate).map_err(|err| {
            PortalError::Configuration(format!("invalid target address '{address}': {err}"))
        })?;
        let hostname = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                PortalError::Configuration(format!("target address '{address}' has no host"))
            })?
            .to_ascii_lowercase();

        Ok(Self {
            scheme: url.scheme().to_string(),
            hostname,
            port: url.port(),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// `host[:port]`, the form used as a map key and in log fields.
    pub fn key(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.hostname),
            None => self.hostname.clone(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.key())
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }

    /// File-system safe key used for persisted credentials.
    pub fn storage_key(&self) -> String {
        self.key().replace(['.', ':'], "_")
    }

    /// Whether `url` points at this target rather than somewhere else (an IDP).
    pub fn owns_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => parsed
                .host_str()
                .map(|host| host.eq_ignore_ascii_case(&self.hostname))
                .unwrap_or(false),
            Err(_) => url.to_ascii_lowercase().contains(&self.hostname),
        }
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
