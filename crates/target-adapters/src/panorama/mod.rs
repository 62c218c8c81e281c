//! Panorama-style firewall manager. Everything goes through in-page RPC
//! (`Panos.direct.run`) with the XML config API as a fallback.

mod direct;
mod intent;
pub mod scripts;

use std::time::Duration;

use portal_core_types::adapter::default_idp_indicators;
use portal_core_types::{
    CandidateOperation, Locator, LoginAffordances, NavProbe, OperationCall, PortalError,
    QueryKind, ScriptCall, TargetAdapter, TargetIdentity,
};
use serde_json::{json, Value};

pub use direct::{IntentOutcome, PanoramaDirect, LOG_POLL_INTERVAL, LOG_POLL_TIMEOUT};
pub use intent::{ObjectKind, PanoramaIntent, RulePosition, INTENT_NAMES};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);
/// Headroom between the in-page timer and the evaluation timeout.
const SCRIPT_MARGIN: Duration = Duration::from_secs(5);

/// Dashboard request flags shared by the `DashboardDirect` calls.
fn dashboard_params() -> Value {
    json!([{ "isCmsSelected": true, "isMultiVsys": false, "getTestXML": false, "vsysName": "" }])
}

fn template_params(template: &str) -> Value {
    if template.is_empty() {
        json!({})
    } else {
        json!({ "template": template })
    }
}

pub struct PanoramaAdapter {
    target: TargetIdentity,
    login: LoginAffordances,
    nav: NavProbe,
    idp: Vec<String>,
    popups: Vec<Locator>,
    rpc_timeout: Duration,
}

impl PanoramaAdapter {
    pub fn new(target: TargetIdentity) -> Self {
        let css = |selectors: &[&str]| -> Vec<Locator> {
            selectors.iter().map(|s| Locator::css(*s)).collect()
        };

        let mut sso_links: Vec<Locator> = ["Single Sign-On", "Use Single Sign", "SSO"]
            .into_iter()
            .map(|text| Locator::text(text, Some("a")))
            .collect();
        sso_links.extend(css(&["a[href*=\"saml\"]", "#sso_login"]));

        let mut continue_buttons = vec![Locator::text("Continue", Some("button"))];
        continue_buttons.extend(css(&["input[type=\"submit\"]", "button[type=\"submit\"]"]));

        let mut popups: Vec<Locator> = ["Close", "Got It", "OK", "Dismiss"]
            .into_iter()
            .map(|text| Locator::text(text, Some("button")))
            .collect();
        popups.extend(css(&[
            ".modal .close",
            ".dialog .close",
            "button.pan-btn-close",
            ".modal-close",
            "[aria-label=\"Close\"]",
            "#whatsnew-close",
            ".whatsnew button",
            ".release-notes button",
        ]));

        Self {
            target,
            login: LoginAffordances {
                login_form: css(&[
                    "input[name=\"user\"]",
                    "input[name=\"passwd\"]",
                    "#loginForm",
                    "input[type=\"password\"]",
                ]),
                sso_links,
                account_inputs: css(&[
                    "input[placeholder*=\"SSO Account\"]",
                    "input[placeholder*=\"SSO\"]",
                    "input[placeholder*=\"Account\"]",
                    "input[name*=\"sso\"]",
                    "input[id*=\"sso\"]",
                    "input[type=\"text\"]",
                ]),
                continue_buttons,
                intermediate_titles: vec!["single sign".into(), "sso".into()],
            },
            nav: NavProbe {
                locators: css(&[
                    "#dashboard",
                    ".pan-dashboard",
                    "#topNav",
                    ".device-tab",
                    "#acc-management",
                    ".dashboard-widget",
                ]),
                labels: [
                    "Dashboard", "ACC", "Monitor", "Policies", "Objects", "Network", "Device",
                    "Panorama",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
                ..NavProbe::default()
            },
            idp: default_idp_indicators(),
            popups,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// `Panos.direct.run(method, params)` as a candidate.
    pub fn rpc(&self, method: &str, params: Value, priority: u32) -> CandidateOperation {
        self.rpc_with_timeout(method, params, priority, self.rpc_timeout)
    }

    pub fn rpc_with_timeout(
        &self,
        method: &str,
        params: Value,
        priority: u32,
        timeout: Duration,
    ) -> CandidateOperation {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let mut call = ScriptCall::new(scripts::DIRECT_RUN, json!([method, params.clone(), timeout_ms]));
        call.timeout = timeout + SCRIPT_MARGIN;
        CandidateOperation::new(method, priority, OperationCall::Script(call))
            .with_parameters(params)
    }

    /// Config API `get` on `xpath` as a candidate.
    pub fn config_get(&self, xpath: &str, priority: u32) -> CandidateOperation {
        let mut call = ScriptCall::new(scripts::CONFIG_GET, json!(xpath));
        call.timeout = self.rpc_timeout + SCRIPT_MARGIN;
        CandidateOperation::new("config_api", priority, OperationCall::Script(call))
            .with_parameters(json!({ "xpath": xpath }))
    }

    /// Candidates for one single-step intent. Logs and two-sided rulebases are
    /// multi-step and go through [`PanoramaDirect`].
    pub fn intent_candidates(
        &self,
        intent: &PanoramaIntent,
    ) -> Result<Vec<CandidateOperation>, PortalError> {
        let candidates = match intent {
            PanoramaIntent::SystemInfo => {
                vec![self.rpc("DashboardDirect.getSystemInfo", dashboard_params(), 0)]
            }
            PanoramaIntent::SystemResources => {
                vec![self.rpc("DashboardDirect.getSystemResources", dashboard_params(), 0)]
            }
            PanoramaIntent::DeviceGroups | PanoramaIntent::DeviceSummary => {
                vec![self.rpc("DashboardDirect.getManagedDevicesInfo", dashboard_params(), 0)]
            }
            PanoramaIntent::ManagedDevices => vec![self.rpc(
                "DeviceDirect.getGroupedManagedDevices",
                json!([{ "type": "all" }]),
                0,
            )],
            PanoramaIntent::Policies {
                rule_type,
                device_group,
                position,
            } => match position {
                RulePosition::Both => {
                    return Err(PortalError::QueryBuild(
                        "policies for both rulebases are read one position at a time".into(),
                    ))
                }
                single => {
                    let pos = single.expand()[0];
                    self.policy_candidates(rule_type, device_group, pos)
                }
            },
            PanoramaIntent::Templates => vec![
                self.rpc("PanoramaScalability.getDeviceGroupAndTemplateStatusMap", json!([{}]), 0),
                self.rpc("DeviceDirect.getTemplateInfo", json!([{}]), 1),
                self.rpc("DeviceDirect.getTemplateStackInfo", json!([{}]), 2),
            ],
            PanoramaIntent::CommitHistory { limit } => vec![self.rpc(
                "ConfigAudit.getAllCommitVersionList",
                json!([{ "nlogs": limit }]),
                0,
            )],
            PanoramaIntent::Objects {
                kind,
                device_group,
                search,
            } => {
                let mut base = json!({ "dg": device_group });
                if !search.is_empty() {
                    base["filter"] = json!(search);
                }
                let mut all = base.clone();
                all["type"] = json!(kind.type_word());
                vec![
                    self.rpc(kind.method(), json!([base]), 0),
                    self.rpc("ObjectsDirect.getAll", json!([all]), 1),
                ]
            }
            PanoramaIntent::Zones { template } => {
                let mut params = json!({ "type": "zone" });
                let xpath = if template.is_empty() {
                    "/config/devices/entry/vsys/entry/zone".to_string()
                } else {
                    params["template"] = json!(template);
                    format!(
                        "/config/devices/entry/template/entry[@name='{template}']/config/devices/entry/vsys/entry/zone"
                    )
                };
                vec![
                    self.rpc("ObjectsDirect.getAll", json!([params.clone()]), 0),
                    self.rpc("ObjectsDirect.getZones", json!([params]), 1),
                    self.config_get(&xpath, 2),
                ]
            }
            PanoramaIntent::Interfaces { template } => {
                let params = json!([template_params(template)]);
                vec![
                    self.rpc("NetworkDirect.getLinkStateMap", params.clone(), 0),
                    self.rpc("NetworkDirect.showAll", params, 1),
                ]
            }
            PanoramaIntent::Routing { template } => {
                let params = json!([template_params(template)]);
                vec![
                    self.rpc("NetworkDirect.getVirtualRouterRunTimeStats", params.clone(), 0),
                    self.rpc("NetworkDirect.showAll", params, 1),
                ]
            }
            PanoramaIntent::Jobs { status, limit } => {
                let mut params = json!({});
                if !status.is_empty() {
                    params["status"] = json!(status);
                }
                if *limit > 0 {
                    params["nlogs"] = json!(limit);
                }
                let params = json!([params]);
                vec![
                    self.rpc("MonitorDirect.getTasks", params.clone(), 0),
                    self.rpc("PanDirect.pollJobs", params, 1),
                ]
            }
            PanoramaIntent::HaStatus => vec![
                self.rpc("DeviceDirect.getHAConfig", json!([{}]), 0),
                self.rpc("DeviceDirect.getHAMode", json!([{}]), 1),
                self.rpc("DeviceDirect.getLocalState", json!([{}]), 2),
            ],
            PanoramaIntent::SoftwareInfo => vec![
                self.rpc("Software.getUpgradeHistory", json!([{}]), 0),
                self.rpc("DynamicUpdates.getDownloadedContent", json!([{}]), 1),
                self.rpc("DeviceDirect.getLicensesList", json!([{}]), 2),
            ],
            PanoramaIntent::Direct { method, params } => vec![self.rpc(method, params.clone(), 0)],
            PanoramaIntent::Logs { .. } => {
                return Err(PortalError::QueryBuild(
                    "logs run as an enqueued job, not a single call".into(),
                ))
            }
        };
        Ok(candidates)
    }

    /// Rulebase candidates for one position (`pre` or `post`).
    pub fn policy_candidates(
        &self,
        rule_type: &str,
        device_group: &str,
        position: &str,
    ) -> Vec<CandidateOperation> {
        let capitalized = {
            let mut chars = position.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        };
        let xpath = format!(
            "/config/devices/entry/device-group/entry[@name='{device_group}']/{position}-rulebase/{rule_type}/rules"
        );
        vec![
            self.rpc(
                "PoliciesDirect.getRules",
                json!([{ "dg": device_group, "type": rule_type, "position": position }]),
                0,
            ),
            self.rpc(
                &format!("PoliciesDirect.get{capitalized}Rules"),
                json!([{ "dg": device_group, "type": rule_type }]),
                1,
            ),
            self.config_get(&xpath, 2),
        ]
    }
}

impl TargetAdapter for PanoramaAdapter {
    fn kind(&self) -> &'static str {
        "panorama"
    }

    fn target(&self) -> &TargetIdentity {
        &self.target
    }

    fn landing_url(&self) -> String {
        self.target.url_for("/")
    }

    fn login_affordances(&self) -> &LoginAffordances {
        &self.login
    }

    fn nav_affordance_probe(&self) -> &NavProbe {
        &self.nav
    }

    fn idp_indicators(&self) -> &[String] {
        &self.idp
    }

    fn popup_dismissals(&self) -> &[Locator] {
        &self.popups
    }

    fn candidate_operations_for(
        &self,
        kind: &QueryKind,
    ) -> Result<Vec<CandidateOperation>, PortalError> {
        match kind {
            QueryKind::Intent { name, params } => {
                self.intent_candidates(&PanoramaIntent::parse(name, params)?)
            }
            other => Err(PortalError::QueryBuild(format!(
                "panorama does not support {}",
                other.label()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> PanoramaAdapter {
        PanoramaAdapter::new(TargetIdentity::parse("https://fw.acme.example").unwrap())
    }

    fn script(candidate: &CandidateOperation) -> &ScriptCall {
        match &candidate.call {
            OperationCall::Script(call) => call,
            OperationCall::Page(_) => panic!("{} is not a script", candidate.name),
        }
    }

    #[test]
    fn rpc_candidates_carry_method_params_and_timeout() {
        let adapter = adapter().with_rpc_timeout(Duration::from_secs(10));
        let candidate = adapter.rpc("DashboardDirect.getSystemInfo", dashboard_params(), 0);
        let call = script(&candidate);
        assert_eq!(call.source, scripts::DIRECT_RUN);
        assert_eq!(call.args[0], "DashboardDirect.getSystemInfo");
        assert_eq!(call.args[1][0]["isCmsSelected"], true);
        assert_eq!(call.args[2], 10_000);
        assert_eq!(call.timeout, Duration::from_secs(15));
    }

    #[test]
    fn policy_candidates_fall_back_to_config_xpath() {
        let candidates = adapter()
            .candidate_operations_for(&QueryKind::Intent {
                name: "policies".into(),
                params: json!({ "type": "nat", "device_group": "branch", "position": "post" }),
            })
            .unwrap();
        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            ["PoliciesDirect.getRules", "PoliciesDirect.getPostRules", "config_api"]
        );
        assert_eq!(
            script(&candidates[2]).args,
            json!("/config/devices/entry/device-group/entry[@name='branch']/post-rulebase/nat/rules")
        );
    }

    #[test]
    fn object_lookups_try_the_dedicated_getter_then_get_all() {
        let candidates = adapter()
            .candidate_operations_for(&QueryKind::Intent {
                name: "address_groups".into(),
                params: json!({ "device_group": "branch", "search": "dns" }),
            })
            .unwrap();
        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["ObjectsDirect.getAddressGroups", "ObjectsDirect.getAll"]);
        assert_eq!(script(&candidates[0]).args[1], json!([{ "dg": "branch", "filter": "dns" }]));
        assert_eq!(
            script(&candidates[1]).args[1],
            json!([{ "dg": "branch", "filter": "dns", "type": "address-group" }])
        );
    }

    #[test]
    fn zones_fall_back_to_the_template_config() {
        let candidates = adapter()
            .candidate_operations_for(&QueryKind::Intent {
                name: "zones".into(),
                params: json!({ "template": "dc-net" }),
            })
            .unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(script(&candidates[0]).args[1], json!([{ "type": "zone", "template": "dc-net" }]));
        assert_eq!(
            script(&candidates[2]).args,
            json!("/config/devices/entry/template/entry[@name='dc-net']/config/devices/entry/vsys/entry/zone")
        );

        let local = adapter()
            .candidate_operations_for(&QueryKind::Intent {
                name: "zones".into(),
                params: Value::Null,
            })
            .unwrap();
        assert_eq!(script(&local[2]).args, json!("/config/devices/entry/vsys/entry/zone"));
    }

    #[test]
    fn monitoring_lookups_chain_their_methods() {
        let adapter = adapter();
        let names = |name: &str, params: Value| -> Vec<String> {
            adapter
                .candidate_operations_for(&QueryKind::Intent {
                    name: name.into(),
                    params,
                })
                .unwrap()
                .into_iter()
                .map(|c| c.name)
                .collect()
        };
        assert_eq!(
            names("ha_status", Value::Null),
            ["DeviceDirect.getHAConfig", "DeviceDirect.getHAMode", "DeviceDirect.getLocalState"]
        );
        assert_eq!(
            names("software_info", Value::Null),
            ["Software.getUpgradeHistory", "DynamicUpdates.getDownloadedContent", "DeviceDirect.getLicensesList"]
        );
        assert_eq!(
            names("routing", json!({ "template": "edge" })),
            ["NetworkDirect.getVirtualRouterRunTimeStats", "NetworkDirect.showAll"]
        );

        let jobs = adapter
            .candidate_operations_for(&QueryKind::Intent {
                name: "jobs".into(),
                params: json!({ "status": "ACT", "limit": 5 }),
            })
            .unwrap();
        assert_eq!(jobs[0].name, "MonitorDirect.getTasks");
        assert_eq!(script(&jobs[1]).args[1], json!([{ "status": "ACT", "nlogs": 5 }]));
    }

    #[test]
    fn multi_step_and_non_intent_queries_are_refused() {
        let adapter = adapter();
        for kind in [
            QueryKind::Intent {
                name: "logs".into(),
                params: Value::Null,
            },
            QueryKind::Intent {
                name: "policies".into(),
                params: Value::Null,
            },
            QueryKind::Search {
                text: "x".into(),
                limit: 1,
            },
        ] {
            assert!(matches!(
                adapter.candidate_operations_for(&kind),
                Err(PortalError::QueryBuild(_))
            ));
        }
    }

    #[test]
    fn login_affordances_cover_the_intermediate_page() {
        let adapter = adapter();
        let login = adapter.login_affordances();
        assert_eq!(login.account_inputs.len(), 6);
        assert_eq!(login.continue_buttons[0].to_string(), "button:text(\"Continue\")");
        assert!(adapter.popup_dismissals().len() > 8);
        assert_eq!(adapter.landing_url(), "https://fw.acme.example/");
    }
}
