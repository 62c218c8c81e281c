use crate::{
    CandidateOperation, Locator, LoginAffordances, NavProbe, PortalError, QueryKind,
    SnapshotProbe, TargetIdentity,
};

/// IDP hostname fragments shared by every target unless an adapter overrides them.
pub const DEFAULT_IDP_INDICATORS: &[&str] = &[
    "okta",
    "microsoftonline",
    "login.microsoft",
    "adfs",
    "ping",
    "auth0",
    "onelogin",
    "duo",
    "azure",
    "google.com/accounts",
    "sso.",
    "idp.",
    "identity.",
    "federation",
    "saml",
    "sts.",
    "login.windows.net",
    "accounts.google",
];

pub fn default_idp_indicators() -> Vec<String> {
    DEFAULT_IDP_INDICATORS.iter().map(|s| s.to_string()).collect()
}

/// Everything the generic engine needs to know about one kind of target.
pub trait TargetAdapter: Send + Sync {
    /// Short adapter name used in logs and tool output (`servicenow`, `panorama`).
    fn kind(&self) -> &'static str;

    fn target(&self) -> &TargetIdentity;

    /// Page loaded to (re)validate the session.
    fn landing_url(&self) -> String;

    fn login_affordances(&self) -> &LoginAffordances;

    fn nav_affordance_probe(&self) -> &NavProbe;

    fn idp_indicators(&self) -> &[String];

    /// Modals worth closing after login; clicked best-effort.
    fn popup_dismissals(&self) -> &[Locator] {
        &[]
    }

    /// Ordered candidates for `kind`, or `QueryBuild` when unsupported.
    fn candidate_operations_for(
        &self,
        kind: &QueryKind,
    ) -> Result<Vec<CandidateOperation>, PortalError>;

    fn snapshot_probe(&self) -> SnapshotProbe {
        SnapshotProbe::new(self.login_affordances(), self.nav_affordance_probe())
    }
}
