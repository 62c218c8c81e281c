use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a UI affordance is found in the page.
///
/// Serialized into the probe scripts as `{"css": ".."}` or
/// `{"text": {"contains": "..", "within": ".."}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    Text {
        contains: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        within: Option<String>,
    },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn text(contains: impl Into<String>, within: Option<&str>) -> Self {
        Self::Text {
            contains: contains.into(),
            within: within.map(str::to_string),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => f.write_str(selector),
            Locator::Text { contains, within } => match within {
                Some(scope) => write!(f, "{scope}:text(\"{contains}\")"),
                None => write!(f, "text(\"{contains}\")"),
            },
        }
    }
}

/// UI affordances involved in getting past a login page.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoginAffordances {
    /// Any of these present means a password/login form is showing.
    pub login_form: Vec<Locator>,
    /// "Use single sign-on" links, tried in order.
    pub sso_links: Vec<Locator>,
    /// Intermediate account-selection inputs, tried in order.
    pub account_inputs: Vec<Locator>,
    pub continue_buttons: Vec<Locator>,
    /// Lower-case title fragments that identify the intermediate page.
    pub intermediate_titles: Vec<String>,
}

/// Navigation affordances that only exist once the application shell renders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NavProbe {
    pub locators: Vec<Locator>,
    /// Menu labels searched for in the body text.
    pub labels: Vec<String>,
    pub min_hits: u32,
}

impl Default for NavProbe {
    fn default() -> Self {
        Self {
            locators: Vec::new(),
            labels: Vec::new(),
            min_hits: 3,
        }
    }
}

/// Arguments for the single snapshot probe evaluated in the page.
#[derive(Clone, Debug, Serialize)]
pub struct SnapshotProbe {
    pub login_form: Vec<Locator>,
    pub sso_links: Vec<Locator>,
    pub account_inputs: Vec<Locator>,
    pub nav_locators: Vec<Locator>,
    pub nav_labels: Vec<String>,
    #[serde(skip)]
    pub intermediate_titles: Vec<String>,
}

impl SnapshotProbe {
    pub fn new(login: &LoginAffordances, nav: &NavProbe) -> Self {
        Self {
            login_form: login.login_form.clone(),
            sso_links: login.sso_links.clone(),
            account_inputs: login.account_inputs.clone(),
            nav_locators: nav.locators.clone(),
            nav_labels: nav.labels.clone(),
            intermediate_titles: login.intermediate_titles.clone(),
        }
    }
}

/// Observation of the page the session is currently on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub login_form: bool,
    pub nav_hits: u32,
    pub intermediate: bool,
}

impl PageSnapshot {
    /// Folds the raw probe result into a snapshot. Missing keys read as "absent".
    pub fn from_probe(url: String, title: String, raw: &Value, probe: &SnapshotProbe) -> Self {
        let flag = |key: &str| raw.get(key).and_then(Value::as_bool).unwrap_or(false);
        let nav_hits = raw
            .get("nav_hits")
            .and_then(Value::as_u64)
            .map(|hits| hits.min(u32::MAX as u64) as u32)
            .unwrap_or(0);

        let lowered_title = title.to_ascii_lowercase();
        let title_says_intermediate = probe
            .intermediate_titles
            .iter()
            .any(|fragment| !fragment.is_empty() && lowered_title.contains(fragment.as_str()));

        Self {
            url,
            title,
            login_form: flag("login_form"),
            nav_hits,
            intermediate: flag("intermediate") || title_says_intermediate,
        }
    }
}

/// Result of classifying one snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    LoggedIn,
    OnLoginForm,
    OnSsoIntermediate,
    OnIdpPage,
    Unknown,
}

impl LoginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginState::LoggedIn => "logged_in",
            LoginState::OnLoginForm => "on_login_form",
            LoginState::OnSsoIntermediate => "on_sso_intermediate",
            LoginState::OnIdpPage => "on_idp_page",
            LoginState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session state machine owned by the session manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    CheckingSavedCredential,
    OnLoginForm,
    OnSsoIntermediate,
    OnIdpPage,
    Authenticated,
    Failed,
}

impl Default for AuthState {
    fn default() -> Self {
        AuthState::Unauthenticated
    }
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed)
    }
}

impl From<LoginState> for AuthState {
    fn from(state: LoginState) -> Self {
        match state {
            LoginState::LoggedIn => AuthState::Authenticated,
            LoginState::OnLoginForm => AuthState::OnLoginForm,
            LoginState::OnSsoIntermediate => AuthState::OnSsoIntermediate,
            LoginState::OnIdpPage => AuthState::OnIdpPage,
            LoginState::Unknown => AuthState::CheckingSavedCredential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn probe_with_titles(titles: &[&str]) -> SnapshotProbe {
        let login = LoginAffordances {
            intermediate_titles: titles.iter().map(|t| t.to_string()).collect(),
            ..LoginAffordances::default()
        };
        SnapshotProbe::new(&login, &NavProbe::default())
    }

    #[test]
    fn locators_serialize_for_probe_scripts() {
        assert_eq!(
            serde_json::to_value(Locator::css("#loginForm")).unwrap(),
            json!({ "css": "#loginForm" })
        );
        assert_eq!(
            serde_json::to_value(Locator::text("Continue", Some("button"))).unwrap(),
            json!({ "text": { "contains": "Continue", "within": "button" } })
        );
    }

    #[test]
    fn snapshot_reads_probe_flags() {
        let snapshot = PageSnapshot::from_probe(
            "https://fw.example.com/".into(),
            "Panorama".into(),
            &json!({ "login_form": false, "nav_hits": 5, "intermediate": false }),
            &probe_with_titles(&[]),
        );
        assert_eq!(snapshot.nav_hits, 5);
        assert!(!snapshot.login_form);
        assert!(!snapshot.intermediate);
    }

    #[test]
    fn title_marks_intermediate_page() {
        let snapshot = PageSnapshot::from_probe(
            "https://fw.example.com/sso".into(),
            "Single Sign-On Account".into(),
            &json!(null),
            &probe_with_titles(&["single sign", "sso"]),
        );
        assert!(snapshot.intermediate);
        assert_eq!(snapshot.nav_hits, 0);
    }

    #[test]
    fn unknown_classification_maps_back_to_checking() {
        assert_eq!(
            AuthState::from(LoginState::Unknown),
            AuthState::CheckingSavedCredential
        );
        assert!(AuthState::from(LoginState::LoggedIn).is_terminal());
    }
}
