use portal_core_types::{LoginState, PageSnapshot, TargetAdapter, TargetIdentity};

/// Pure classifier from a page snapshot to a login state.
#[derive(Clone, Debug)]
pub struct LoginClassifier {
    target: TargetIdentity,
    idp_indicators: Vec<String>,
    min_nav_hits: u32,
}

impl LoginClassifier {
    pub fn new(target: TargetIdentity, idp_indicators: Vec<String>, min_nav_hits: u32) -> Self {
        Self {
            target,
            idp_indicators: idp_indicators
                .into_iter()
                .map(|indicator| indicator.to_ascii_lowercase())
                .filter(|indicator| !indicator.is_empty())
                .collect(),
            min_nav_hits,
        }
    }

    pub fn for_adapter(adapter: &dyn TargetAdapter) -> Self {
        Self::new(
            adapter.target().clone(),
            adapter.idp_indicators().to_vec(),
            adapter.nav_affordance_probe().min_hits,
        )
    }

    pub fn is_idp_url(&self, url: &str) -> bool {
        if self.target.owns_url(url) {
            return false;
        }
        let lowered = url.to_ascii_lowercase();
        self.idp_indicators
            .iter()
            .any(|indicator| lowered.contains(indicator.as_str()))
    }

    /// First matching rule wins:
    /// off-target IDP url, login form on the target, enough navigation hits,
    /// any other on-target page (still loading), intermediate page.
    pub fn classify(&self, snapshot: &PageSnapshot) -> LoginState {
        let on_target = self.target.owns_url(&snapshot.url);

        if !on_target && self.is_idp_url(&snapshot.url) {
            return LoginState::OnIdpPage;
        }
        if on_target && snapshot.login_form {
            return LoginState::OnLoginForm;
        }
        if snapshot.nav_hits >= self.min_nav_hits {
            return LoginState::LoggedIn;
        }
        if on_target {
            return LoginState::Unknown;
        }
        if snapshot.intermediate {
            LoginState::OnSsoIntermediate
        } else {
            LoginState::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core_types::adapter::default_idp_indicators;

    fn classifier() -> LoginClassifier {
        LoginClassifier::new(
            TargetIdentity::parse("https://acme.service-now.com").unwrap(),
            default_idp_indicators(),
            3,
        )
    }

    fn snapshot(url: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            ..PageSnapshot::default()
        }
    }

    #[test]
    fn idp_pages_win_over_everything_else() {
        let snap = PageSnapshot {
            login_form: true,
            nav_hits: 9,
            ..snapshot("https://acme.okta.com/app/sso/saml")
        };
        assert_eq!(classifier().classify(&snap), LoginState::OnIdpPage);
    }

    #[test]
    fn login_form_on_target() {
        let snap = PageSnapshot {
            login_form: true,
            ..snapshot("https://acme.service-now.com/login.do")
        };
        assert_eq!(classifier().classify(&snap), LoginState::OnLoginForm);
    }

    #[test]
    fn navigation_hits_mean_logged_in() {
        let snap = PageSnapshot {
            nav_hits: 3,
            ..snapshot("https://ACME.service-now.com/nav_to.do")
        };
        assert_eq!(classifier().classify(&snap), LoginState::LoggedIn);

        let sparse = PageSnapshot {
            nav_hits: 2,
            ..snapshot("https://acme.service-now.com/nav_to.do")
        };
        assert_eq!(classifier().classify(&sparse), LoginState::Unknown);
    }

    #[test]
    fn intermediate_only_counts_off_target() {
        let on_target = PageSnapshot {
            intermediate: true,
            ..snapshot("https://acme.service-now.com/")
        };
        assert_eq!(classifier().classify(&on_target), LoginState::Unknown);

        let elsewhere = PageSnapshot {
            intermediate: true,
            ..snapshot("https://portal.example.net/choose-account")
        };
        assert_eq!(classifier().classify(&elsewhere), LoginState::OnSsoIntermediate);
        assert_eq!(
            classifier().classify(&snapshot("https://portal.example.net/")),
            LoginState::Unknown
        );
    }

    #[test]
    fn target_hosts_are_never_idp_pages() {
        let c = LoginClassifier::new(
            TargetIdentity::parse("https://sso.acme.example").unwrap(),
            default_idp_indicators(),
            3,
        );
        assert!(!c.is_idp_url("https://sso.acme.example/login"));
        assert!(c.is_idp_url("https://login.microsoftonline.com/common"));
    }
}
