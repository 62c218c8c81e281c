use portal_core_types::PortalError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INTENT_NAMES: &[&str] = &[
    "system_info",
    "system_resources",
    "device_groups",
    "device_summary",
    "managed_devices",
    "policies",
    "templates",
    "commit_history",
    "logs",
    "address_objects",
    "service_objects",
    "address_groups",
    "service_groups",
    "zones",
    "interfaces",
    "routing",
    "jobs",
    "ha_status",
    "software_info",
    "direct",
];

/// Object families served by `ObjectsDirect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Address,
    Service,
    AddressGroup,
    ServiceGroup,
}

impl ObjectKind {
    pub fn intent_name(self) -> &'static str {
        match self {
            ObjectKind::Address => "address_objects",
            ObjectKind::Service => "service_objects",
            ObjectKind::AddressGroup => "address_groups",
            ObjectKind::ServiceGroup => "service_groups",
        }
    }

    /// Dedicated `ObjectsDirect` getter.
    pub fn method(self) -> &'static str {
        match self {
            ObjectKind::Address => "ObjectsDirect.getAddresses",
            ObjectKind::Service => "ObjectsDirect.getServices",
            ObjectKind::AddressGroup => "ObjectsDirect.getAddressGroups",
            ObjectKind::ServiceGroup => "ObjectsDirect.getServiceGroups",
        }
    }

    /// `type` word understood by `ObjectsDirect.getAll`.
    pub fn type_word(self) -> &'static str {
        match self {
            ObjectKind::Address => "address",
            ObjectKind::Service => "service",
            ObjectKind::AddressGroup => "address-group",
            ObjectKind::ServiceGroup => "service-group",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulePosition {
    Pre,
    Post,
    #[default]
    Both,
}

impl RulePosition {
    /// Concrete rulebases to read, pre before post.
    pub fn expand(self) -> &'static [&'static str] {
        match self {
            RulePosition::Pre => &["pre"],
            RulePosition::Post => &["post"],
            RulePosition::Both => &["pre", "post"],
        }
    }
}

/// A named Panorama request with its typed parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum PanoramaIntent {
    SystemInfo,
    SystemResources,
    DeviceGroups,
    DeviceSummary,
    ManagedDevices,
    Policies {
        rule_type: String,
        device_group: String,
        position: RulePosition,
    },
    Templates,
    CommitHistory {
        limit: u32,
    },
    Logs {
        log_type: String,
        query: String,
        limit: u32,
    },
    Objects {
        kind: ObjectKind,
        device_group: String,
        search: String,
    },
    /// Empty template means the Panorama's own configuration.
    Zones {
        template: String,
    },
    Interfaces {
        template: String,
    },
    Routing {
        template: String,
    },
    Jobs {
        status: String,
        limit: u32,
    },
    HaStatus,
    SoftwareInfo,
    Direct {
        method: String,
        params: Value,
    },
}

#[derive(Deserialize)]
struct PolicyParams {
    #[serde(rename = "type", default = "default_rule_type")]
    rule_type: String,
    #[serde(default = "default_device_group")]
    device_group: String,
    #[serde(default)]
    position: RulePosition,
}

#[derive(Deserialize)]
struct CommitParams {
    #[serde(default = "default_commit_limit")]
    limit: u32,
}

#[derive(Deserialize)]
struct LogParams {
    #[serde(rename = "type", alias = "log_type", default = "default_log_type")]
    log_type: String,
    #[serde(default)]
    query: String,
    #[serde(default = "default_log_limit")]
    limit: u32,
}

#[derive(Deserialize)]
struct ObjectParams {
    #[serde(default = "default_device_group")]
    device_group: String,
    #[serde(default)]
    search: String,
}

#[derive(Deserialize)]
struct TemplateParams {
    #[serde(default)]
    template: String,
}

#[derive(Deserialize)]
struct JobParams {
    #[serde(default)]
    status: String,
    #[serde(default = "default_commit_limit")]
    limit: u32,
}

#[derive(Deserialize)]
struct DirectParams {
    method: String,
    #[serde(default)]
    params: Value,
}

fn default_rule_type() -> String {
    "security".into()
}

fn default_device_group() -> String {
    "shared".into()
}

fn default_commit_limit() -> u32 {
    50
}

fn default_log_type() -> String {
    "traffic".into()
}

fn default_log_limit() -> u32 {
    100
}

fn params<T: DeserializeOwned>(name: &str, raw: &Value) -> Result<T, PortalError> {
    let raw = if raw.is_null() {
        Value::Object(Default::default())
    } else {
        raw.clone()
    };
    serde_json::from_value(raw)
        .map_err(|err| PortalError::QueryBuild(format!("bad parameters for {name}: {err}")))
}

fn word(name: &str, field: &str, value: &str) -> Result<(), PortalError> {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(PortalError::QueryBuild(format!(
            "{name}: {field} {value:?} must be a plain word"
        )))
    }
}

/// Names spliced into config xpaths must not close the predicate.
fn xpath_name(name: &str, field: &str, value: &str) -> Result<(), PortalError> {
    if value.contains(['\'', '"', ']', '[']) {
        return Err(PortalError::QueryBuild(format!(
            "{name}: invalid {field} {value:?}"
        )));
    }
    Ok(())
}

fn objects(name: &str, kind: ObjectKind, raw: &Value) -> Result<PanoramaIntent, PortalError> {
    let p: ObjectParams = params(name, raw)?;
    if p.device_group.is_empty() {
        return Err(PortalError::QueryBuild(format!("{name}: device group is empty")));
    }
    xpath_name(name, "device group", &p.device_group)?;
    Ok(PanoramaIntent::Objects {
        kind,
        device_group: p.device_group,
        search: p.search.trim().to_string(),
    })
}

fn template(name: &str, raw: &Value) -> Result<String, PortalError> {
    let p: TemplateParams = params(name, raw)?;
    let template = p.template.trim().to_string();
    xpath_name(name, "template", &template)?;
    Ok(template)
}

impl PanoramaIntent {
    pub fn parse(name: &str, raw: &Value) -> Result<Self, PortalError> {
        let intent = match name {
            "system_info" => Self::SystemInfo,
            "system_resources" => Self::SystemResources,
            "device_groups" => Self::DeviceGroups,
            "device_summary" => Self::DeviceSummary,
            "managed_devices" => Self::ManagedDevices,
            "templates" => Self::Templates,
            "ha_status" => Self::HaStatus,
            "software_info" => Self::SoftwareInfo,
            "address_objects" => objects(name, ObjectKind::Address, raw)?,
            "service_objects" => objects(name, ObjectKind::Service, raw)?,
            "address_groups" => objects(name, ObjectKind::AddressGroup, raw)?,
            "service_groups" => objects(name, ObjectKind::ServiceGroup, raw)?,
            "zones" => Self::Zones {
                template: template(name, raw)?,
            },
            "interfaces" => Self::Interfaces {
                template: template(name, raw)?,
            },
            "routing" => Self::Routing {
                template: template(name, raw)?,
            },
            "jobs" => {
                let p: JobParams = params(name, raw)?;
                if !p.status.is_empty() {
                    word(name, "status", &p.status)?;
                }
                Self::Jobs {
                    status: p.status,
                    limit: p.limit,
                }
            }
            "policies" => {
                let p: PolicyParams = params(name, raw)?;
                word(name, "type", &p.rule_type)?;
                if p.device_group.is_empty() {
                    return Err(PortalError::QueryBuild("policies: device group is empty".into()));
                }
                xpath_name(name, "device group", &p.device_group)?;
                Self::Policies {
                    rule_type: p.rule_type,
                    device_group: p.device_group,
                    position: p.position,
                }
            }
            "commit_history" => {
                let p: CommitParams = params(name, raw)?;
                Self::CommitHistory { limit: p.limit }
            }
            "logs" => {
                let p: LogParams = params(name, raw)?;
                word(name, "type", &p.log_type)?;
                Self::Logs {
                    log_type: p.log_type,
                    query: p.query,
                    limit: p.limit,
                }
            }
            "direct" => {
                let p: DirectParams = params(name, raw)?;
                if p.method.trim().is_empty() {
                    return Err(PortalError::QueryBuild("direct: method is empty".into()));
                }
                Self::Direct {
                    method: p.method,
                    params: match p.params {
                        Value::Null => Value::Array(Vec::new()),
                        Value::Array(items) => Value::Array(items),
                        other => Value::Array(vec![other]),
                    },
                }
            }
            other => {
                return Err(PortalError::QueryBuild(format!(
                    "unknown panorama intent {other:?}; expected one of {}",
                    INTENT_NAMES.join(", ")
                )))
            }
        };
        Ok(intent)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SystemInfo => "system_info",
            Self::SystemResources => "system_resources",
            Self::DeviceGroups => "device_groups",
            Self::DeviceSummary => "device_summary",
            Self::ManagedDevices => "managed_devices",
            Self::Policies { .. } => "policies",
            Self::Templates => "templates",
            Self::CommitHistory { .. } => "commit_history",
            Self::Logs { .. } => "logs",
            Self::Objects { kind, .. } => kind.intent_name(),
            Self::Zones { .. } => "zones",
            Self::Interfaces { .. } => "interfaces",
            Self::Routing { .. } => "routing",
            Self::Jobs { .. } => "jobs",
            Self::HaStatus => "ha_status",
            Self::SoftwareInfo => "software_info",
            Self::Direct { .. } => "direct",
        }
    }
}
