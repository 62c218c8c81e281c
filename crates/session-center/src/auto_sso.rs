use std::fmt;
use std::time::Duration;

use cdp_adapter::BrowserPage;
use portal_core_types::{poll_until_some, Locator, LoginState, TargetAdapter};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::classifier::LoginClassifier;

const CLICK_TIMEOUT: Duration = Duration::from_secs(5);
const POPUP_TIMEOUT: Duration = Duration::from_millis(1500);

/// How a silent SSO attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SsoOutcome {
    LoggedIn,
    /// The target's own login form came back; the IDP wants interaction.
    NeedsHuman,
    TimedOut,
}

impl SsoOutcome {
    pub fn success(&self) -> bool {
        matches!(self, SsoOutcome::LoggedIn)
    }
}

impl fmt::Display for SsoOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SsoOutcome::LoggedIn => "logged_in",
            SsoOutcome::NeedsHuman => "needs_human",
            SsoOutcome::TimedOut => "timed_out",
        })
    }
}

#[derive(Clone, Debug)]
pub struct AutoSsoSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after the SSO link click and after submitting the account.
    pub step_pause: Duration,
}

impl Default for AutoSsoSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            poll_interval: Duration::from_secs(2),
            step_pause: Duration::from_secs(2),
        }
    }
}

/// Drives a login form or SSO intermediate page toward a logged-in state using
/// only the adapter's declared affordances.
#[derive(Clone, Debug, Default)]
pub struct AutoSsoDriver {
    settings: AutoSsoSettings,
}

impl AutoSsoDriver {
    pub fn new(settings: AutoSsoSettings) -> Self {
        Self { settings }
    }

    pub async fn run(
        &self,
        page: &dyn BrowserPage,
        adapter: &dyn TargetAdapter,
        classifier: &LoginClassifier,
        account: Option<&str>,
    ) -> SsoOutcome {
        let target = adapter.target().key();
        let affordances = adapter.login_affordances();

        if let Some(link) = first_visible(page, &affordances.sso_links).await {
            match page.click(link, CLICK_TIMEOUT).await {
                Ok(()) => {
                    debug!(target: "auto-sso", %target, %link, "clicked sso link");
                    sleep(self.settings.step_pause).await;
                }
                Err(err) => debug!(target: "auto-sso", %target, %err, "sso link click failed"),
            }
        }

        if fill_account(page, adapter, account).await {
            sleep(self.settings.step_pause).await;
        }

        let started = Instant::now();
        sleep(self.settings.poll_interval).await;

        let outcome = match self.poll(page, adapter, classifier, self.settings.timeout, true).await {
            Polled::Done(outcome) => outcome,
            Polled::Intermediate => {
                debug!(target: "auto-sso", %target, "intermediate page reappeared; resubmitting account");
                fill_account(page, adapter, account).await;
                let remaining = self.settings.timeout.saturating_sub(started.elapsed());
                match self.poll(page, adapter, classifier, remaining, false).await {
                    Polled::Done(outcome) => outcome,
                    Polled::Intermediate => SsoOutcome::TimedOut,
                }
            }
        };

        match outcome {
            SsoOutcome::LoggedIn => {
                info!(target: "auto-sso", %target, "silent sso succeeded");
                dismiss_popups(page, adapter.popup_dismissals()).await;
            }
            other => warn!(target: "auto-sso", %target, outcome = %other, "silent sso did not complete"),
        }
        outcome
    }

    async fn poll(
        &self,
        page: &dyn BrowserPage,
        adapter: &dyn TargetAdapter,
        classifier: &LoginClassifier,
        timeout: Duration,
        stop_on_intermediate: bool,
    ) -> Polled {
        let probe = adapter.snapshot_probe();
        let probe = &probe;
        poll_until_some(self.settings.poll_interval, timeout, || async move {
            let snapshot = match page.snapshot(probe).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    debug!(target: "auto-sso", %err, "snapshot failed while polling");
                    return None;
                }
            };
            match classifier.classify(&snapshot) {
                LoginState::LoggedIn => Some(Polled::Done(SsoOutcome::LoggedIn)),
                LoginState::OnLoginForm => Some(Polled::Done(SsoOutcome::NeedsHuman)),
                _ if stop_on_intermediate && snapshot.intermediate => Some(Polled::Intermediate),
                _ => None,
            }
        })
        .await
        .unwrap_or(Polled::Done(SsoOutcome::TimedOut))
    }
}

enum Polled {
    Done(SsoOutcome),
    Intermediate,
}

async fn first_visible<'a>(page: &dyn BrowserPage, locators: &'a [Locator]) -> Option<&'a Locator> {
    for locator in locators {
        if page.is_visible(locator).await.unwrap_or(false) {
            return Some(locator);
        }
    }
    None
}

/// Fills the account field and presses continue. `false` when nothing was submitted.
async fn fill_account(
    page: &dyn BrowserPage,
    adapter: &dyn TargetAdapter,
    account: Option<&str>,
) -> bool {
    let Some(account) = account.map(str::trim).filter(|account| !account.is_empty()) else {
        return false;
    };
    let affordances = adapter.login_affordances();

    let Some(input) = first_visible(page, &affordances.account_inputs).await else {
        return false;
    };
    if let Err(err) = page.fill(input, account, CLICK_TIMEOUT).await {
        debug!(target: "auto-sso", %err, %input, "account fill failed");
        return false;
    }

    let Some(button) = first_visible(page, &affordances.continue_buttons).await else {
        return false;
    };
    match page.click(button, CLICK_TIMEOUT).await {
        Ok(()) => true,
        Err(err) => {
            debug!(target: "auto-sso", %err, %button, "continue click failed");
            false
        }
    }
}

/// Clicks every visible dismissal affordance once. Failures are ignored.
pub async fn dismiss_popups(page: &dyn BrowserPage, dismissals: &[Locator]) {
    for locator in dismissals {
        if !page.is_visible(locator).await.unwrap_or(false) {
            continue;
        }
        if page.click(locator, POPUP_TIMEOUT).await.is_ok() {
            debug!(target: "auto-sso", %locator, "dismissed popup");
            sleep(Duration::from_secs(1)).await;
        }
    }
}
