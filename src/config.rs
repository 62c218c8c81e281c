//! YAML configuration with environment overrides.
//!
//! Lookup order for the file: explicit path, `./config/portal-bridge.yaml`,
//! then `<config dir>/portal-bridge/config.yaml`. A missing file means
//! defaults; an unreadable default-location file is logged and ignored, an
//! unreadable explicit one is an error.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cdp_adapter::CdpConfig;
use portal_core_types::TargetIdentity;
use retrieval_engine::{EmptyResultPolicy, DEFAULT_MAX_RECORDS, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use session_center::{CredentialStore, SessionPolicy};
use target_adapters::AdapterKind;
use thiserror::Error;
use tracing::{info, warn};

const LOCAL_CONFIG: &str = "config/portal-bridge.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// `8h`, `45s`, `1h 30m` in YAML; whole seconds also accepted.
mod duration_text {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub(super) fn parse(raw: &str) -> Result<Duration, String> {
        let raw = raw.trim();
        if let Ok(secs) = raw.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
        humantime::parse_duration(raw).map_err(|err| format!("'{raw}': {err}"))
    }

    fn from_raw(raw: Raw) -> Result<Duration, String> {
        match raw {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text),
        }
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        from_raw(Raw::deserialize(deserializer)?).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(from_raw)
                .transpose()
                .map_err(D::Error::custom)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    /// Inferred from the hostname when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AdapterKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_account: Option<String>,
}

impl TargetConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: None,
            sso_account: None,
        }
    }

    pub fn identity(&self) -> Result<TargetIdentity, ConfigError> {
        TargetIdentity::parse(&self.url).map_err(|err| ConfigError::invalid("targets.url", err.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Chromium-family executable; autodetected when unset.
    pub executable: Option<PathBuf>,
    #[serde(with = "duration_text")]
    pub default_timeout: Duration,
    #[serde(with = "duration_text")]
    pub heartbeat_interval: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            default_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    #[serde(with = "duration_text")]
    pub ttl: Duration,
    #[serde(with = "duration_text")]
    pub auto_sso_timeout: Duration,
    #[serde(with = "duration_text")]
    pub idp_wait: Duration,
    #[serde(with = "duration_text")]
    pub settle_timeout: Duration,
    #[serde(with = "duration_text")]
    pub poll_interval: Duration,
    /// Prompt an operator on the terminal when silent SSO fails.
    pub interactive: bool,
    #[serde(with = "duration_text::option")]
    pub interactive_timeout: Option<Duration>,
    pub state_dir: Option<PathBuf>,
    /// Account typed into SSO intermediate pages for targets without their own.
    pub sso_account: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let policy = SessionPolicy::default();
        Self {
            ttl: policy.ttl,
            auto_sso_timeout: policy.auto_sso_timeout,
            idp_wait: policy.idp_wait,
            settle_timeout: policy.settle_timeout,
            poll_interval: policy.poll_interval,
            interactive: true,
            interactive_timeout: None,
            state_dir: None,
            sso_account: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub page_size: usize,
    pub max_records: usize,
    pub strict_operators: bool,
    pub empty_results: EmptyResultPolicy,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_records: DEFAULT_MAX_RECORDS,
            strict_operators: false,
            empty_results: EmptyResultPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub targets: Vec<TargetConfig>,
    pub browser: BrowserSettings,
    pub session: SessionSettings,
    pub query: QuerySettings,
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Reads the file (see module docs), then applies the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_locations(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), targets = config.targets.len(), "configuration loaded");
        Ok(config)
    }

    fn from_default_locations() -> Self {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("portal-bridge").join("config.yaml"));
        }
        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::from_file(&candidate) {
                Ok(config) => return config,
                Err(err) => {
                    warn!(%err, "ignoring unusable config file; using defaults");
                    return Self::default();
                }
            }
        }
        Self::default()
    }

    /// Applies `PORTAL_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        if let Some(raw) = lookup("PORTAL_TARGETS") {
            let previous = std::mem::take(&mut self.targets);
            for url in raw.split(',').map(str::trim).filter(|url| !url.is_empty()) {
                let identity = TargetIdentity::parse(url)
                    .map_err(|err| ConfigError::invalid("PORTAL_TARGETS", err.to_string()))?;
                let known = previous
                    .iter()
                    .find(|target| target.identity().ok().as_ref() == Some(&identity))
                    .cloned();
                self.targets.push(known.unwrap_or_else(|| TargetConfig::new(url)));
            }
        }
        if let Some(raw) = lookup("PORTAL_HEADLESS") {
            self.browser.headless = parse_flag("PORTAL_HEADLESS", &raw)?;
        }
        if let Some(account) = lookup("PORTAL_SSO_ACCOUNT").or_else(|| lookup("PANORAMA_SSO_ACCOUNT")) {
            self.session.sso_account = Some(account);
        }
        if let Some(raw) = lookup("PORTAL_SESSION_TTL") {
            self.session.ttl = duration_text::parse(&raw)
                .map_err(|message| ConfigError::invalid("PORTAL_SESSION_TTL", message))?;
        }
        if let Some(dir) = lookup("PORTAL_STATE_DIR") {
            self.session.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(chrome) = lookup("PORTAL_CHROME") {
            self.browser.executable = Some(PathBuf::from(chrome));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for target in &self.targets {
            target.identity()?;
        }
        if self.query.page_size == 0 {
            return Err(ConfigError::invalid("query.page_size", "must be positive"));
        }
        if self.query.max_records == 0 {
            return Err(ConfigError::invalid("query.max_records", "must be positive"));
        }
        if self.session.poll_interval.is_zero() {
            return Err(ConfigError::invalid("session.poll_interval", "must be positive"));
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.session
            .state_dir
            .clone()
            .unwrap_or_else(CredentialStore::default_state_dir)
    }

    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(self.state_dir())
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            ttl: self.session.ttl,
            auto_sso_timeout: self.session.auto_sso_timeout,
            idp_wait: self.session.idp_wait,
            settle_timeout: self.session.settle_timeout,
            poll_interval: self.session.poll_interval,
            navigation_timeout: self.browser.default_timeout,
            interactive_timeout: self.session.interactive_timeout,
            headless: self.browser.headless,
        }
    }

    /// Base Chromium settings; the profile directory is set per launch.
    pub fn cdp_config(&self) -> CdpConfig {
        let mut cdp = CdpConfig::default();
        if let Some(executable) = &self.browser.executable {
            cdp.executable = executable.clone();
        }
        cdp.headless = self.browser.headless;
        cdp.default_deadline_ms = millis(self.browser.default_timeout);
        cdp.heartbeat_interval_ms = millis(self.browser.heartbeat_interval);
        cdp
    }

    /// SSO account for `target`: its own, else the shared one.
    pub fn sso_account_for(&self, target: &TargetConfig) -> Option<String> {
        target
            .sso_account
            .clone()
            .or_else(|| self.session.sso_account.clone())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("'{other}' is not a boolean"))),
    }
}
