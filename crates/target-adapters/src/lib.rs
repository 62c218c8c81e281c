//! Concrete targets: a ServiceNow-style ITSM instance and a Panorama-style
//! firewall manager.

pub mod panorama;
pub mod servicenow;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use portal_core_types::{PortalError, TargetAdapter, TargetIdentity};
use serde::{Deserialize, Serialize};

pub use panorama::{IntentOutcome, PanoramaAdapter, PanoramaDirect, PanoramaIntent};
pub use servicenow::{
    ChangeQuery, FieldInfo, IncidentQuery, ServiceNowAdapter, TableDescription,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    ServiceNow,
    Panorama,
}

impl AdapterKind {
    /// Guesses the kind from the hostname; `None` when it says nothing.
    pub fn infer(target: &TargetIdentity) -> Option<Self> {
        let host = target.hostname();
        if host.contains("service-now") || host.contains("servicenow") {
            Some(Self::ServiceNow)
        } else if host.contains("panorama") {
            Some(Self::Panorama)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceNow => "servicenow",
            Self::Panorama => "panorama",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "servicenow" | "service-now" | "snow" => Ok(Self::ServiceNow),
            "panorama" | "pano" => Ok(Self::Panorama),
            other => Err(PortalError::Configuration(format!(
                "unknown target kind '{other}' (expected servicenow or panorama)"
            ))),
        }
    }
}

/// The adapter registered for one target, kept concrete so callers can reach
/// target-specific helpers as well as the shared trait.
#[derive(Clone)]
pub enum PortalAdapter {
    ServiceNow(Arc<ServiceNowAdapter>),
    Panorama(Arc<PanoramaAdapter>),
}

impl PortalAdapter {
    pub fn new(kind: AdapterKind, target: TargetIdentity) -> Self {
        match kind {
            AdapterKind::ServiceNow => Self::ServiceNow(Arc::new(ServiceNowAdapter::new(target))),
            AdapterKind::Panorama => Self::Panorama(Arc::new(PanoramaAdapter::new(target))),
        }
    }

    /// Builds from an explicit kind, or the one the hostname suggests.
    pub fn for_target(target: TargetIdentity, kind: Option<AdapterKind>) -> Result<Self, PortalError> {
        let kind = kind.or_else(|| AdapterKind::infer(&target)).ok_or_else(|| {
            PortalError::Configuration(format!(
                "cannot tell what kind of target {} is; set `kind` in the target config",
                target.key()
            ))
        })?;
        Ok(Self::new(kind, target))
    }

    pub fn kind(&self) -> AdapterKind {
        match self {
            Self::ServiceNow(_) => AdapterKind::ServiceNow,
            Self::Panorama(_) => AdapterKind::Panorama,
        }
    }

    pub fn target(&self) -> &TargetIdentity {
        match self {
            Self::ServiceNow(adapter) => adapter.target(),
            Self::Panorama(adapter) => adapter.target(),
        }
    }

    pub fn shared(&self) -> Arc<dyn TargetAdapter> {
        match self {
            Self::ServiceNow(adapter) => adapter.clone(),
            Self::Panorama(adapter) => adapter.clone(),
        }
    }

    pub fn as_servicenow(&self) -> Option<&ServiceNowAdapter> {
        match self {
            Self::ServiceNow(adapter) => Some(adapter),
            Self::Panorama(_) => None,
        }
    }

    pub fn as_panorama(&self) -> Option<&PanoramaAdapter> {
        match self {
            Self::Panorama(adapter) => Some(adapter),
            Self::ServiceNow(_) => None,
        }
    }
}

impl fmt::Debug for PortalAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalAdapter")
            .field("kind", &self.kind())
            .field("target", &self.target().key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_inferred_from_hostname() {
        let snow = TargetIdentity::parse("acme.service-now.com").unwrap();
        let pano = TargetIdentity::parse("https://panorama.corp.example:8443").unwrap();
        let other = TargetIdentity::parse("portal.corp.example").unwrap();
        assert_eq!(AdapterKind::infer(&snow), Some(AdapterKind::ServiceNow));
        assert_eq!(AdapterKind::infer(&pano), Some(AdapterKind::Panorama));
        assert_eq!(AdapterKind::infer(&other), None);
        assert!(matches!(
            PortalAdapter::for_target(other, None),
            Err(PortalError::Configuration(_))
        ));
    }

    #[test]
    fn explicit_kind_wins_and_shared_view_matches() {
        let target = TargetIdentity::parse("fw.corp.example").unwrap();
        let adapter = PortalAdapter::for_target(target.clone(), Some(AdapterKind::Panorama)).unwrap();
        assert!(adapter.as_panorama().is_some());
        assert!(adapter.as_servicenow().is_none());
        let shared = adapter.shared();
        assert_eq!(shared.kind(), "panorama");
        assert_eq!(shared.target(), &target);
    }

    #[test]
    fn kind_parses_and_serializes_lowercase() {
        assert_eq!("ServiceNow".parse::<AdapterKind>().unwrap(), AdapterKind::ServiceNow);
        assert!("jira".parse::<AdapterKind>().is_err());
        assert_eq!(serde_json::to_string(&AdapterKind::Panorama).unwrap(), "\"panorama\"");
    }
}
