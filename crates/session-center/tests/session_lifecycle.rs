use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::mock::{ScriptedLauncher, ScriptedPage};
use cdp_adapter::{AdapterError, BrowserPage, LaunchRequest, PageLauncher};
use portal_core_types::adapter::default_idp_indicators;
use portal_core_types::{
    AuthState, CandidateOperation, Locator, LoginAffordances, NavProbe, PageSnapshot,
    PortalError, QueryKind, TargetAdapter, TargetIdentity,
};
use session_center::{
    CredentialStore, HumanSignal, InteractionChannel, SessionManager, SessionPolicy,
};
use tempfile::TempDir;
use tokio::sync::Notify;

const HOST: &str = "https://acme.example.com";
const WIKI: &str = "https://wiki.example.org";

struct Intranet {
    target: TargetIdentity,
    login: LoginAffordances,
    nav: NavProbe,
    idp: Vec<String>,
}

impl Intranet {
    fn new() -> Self {
        Self::at(HOST)
    }

    fn at(host: &str) -> Self {
        Self {
            target: TargetIdentity::parse(host).unwrap(),
            login: LoginAffordances {
                login_form: vec![Locator::css("#loginForm")],
                sso_links: vec![sso_link()],
                ..LoginAffordances::default()
            },
            nav: NavProbe::default(),
            idp: default_idp_indicators(),
        }
    }
}

impl TargetAdapter for Intranet {
    fn kind(&self) -> &'static str {
        "intranet"
    }
    fn target(&self) -> &TargetIdentity {
        &self.target
    }
    fn landing_url(&self) -> String {
        self.target.url_for("/home")
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
    fn candidate_operations_for(
        &self,
        _kind: &QueryKind,
    ) -> Result<Vec<CandidateOperation>, PortalError> {
        Ok(Vec::new())
    }
}

fn sso_link() -> Locator {
    Locator::text("Company Login", Some("a"))
}

fn target() -> TargetIdentity {
    TargetIdentity::parse(HOST).unwrap()
}

fn home() -> PageSnapshot {
    PageSnapshot {
        url: format!("{HOST}/home"),
        title: "Home".into(),
        nav_hits: 4,
        ..PageSnapshot::default()
    }
}

fn login_form() -> PageSnapshot {
    PageSnapshot {
        url: format!("{HOST}/login.do"),
        title: "Log in".into(),
        login_form: true,
        ..PageSnapshot::default()
    }
}

fn wiki_home() -> PageSnapshot {
    PageSnapshot {
        url: format!("{WIKI}/home"),
        title: "Wiki".into(),
        nav_hits: 4,
        ..PageSnapshot::default()
    }
}

fn idp_login() -> PageSnapshot {
    PageSnapshot {
        url: "https://login.microsoftonline.com/common/oauth2/authorize".into(),
        title: "Sign in to your account".into(),
        ..PageSnapshot::default()
    }
}

fn still_loading() -> PageSnapshot {
    PageSnapshot {
        url: format!("{HOST}/home"),
        ..PageSnapshot::default()
    }
}

fn manager(
    dir: &TempDir,
    pages: Vec<Arc<ScriptedPage>>,
    headless: bool,
) -> (Arc<SessionManager>, Arc<ScriptedLauncher>) {
    let launcher = Arc::new(ScriptedLauncher::new(pages));
    let policy = SessionPolicy {
        headless,
        ..SessionPolicy::default()
    };
    let manager = SessionManager::new(launcher.clone(), CredentialStore::new(dir.path()), policy);
    manager.register(Arc::new(Intranet::new()), None);
    (Arc::new(manager), launcher)
}

#[tokio::test(start_paused = true)]
async fn reuses_a_logged_in_session_without_auto_sso() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(ScriptedPage::new(home()));
    let (manager, launcher) = manager(&dir, vec![page.clone()], true);

    let first = manager.ensure_authenticated(&target()).await.unwrap();
    assert!(first.is_authenticated());

    let second = manager.ensure_authenticated(&target()).await.unwrap();
    let record = second.record();
    assert_eq!(record.auth_state, AuthState::Authenticated);
    assert_eq!(record.auto_sso_attempts, 0);
    assert_eq!(record.session_id, first.record().session_id);
    assert!(record.credential_handle.is_some());

    assert_eq!(launcher.launch_count(), 1);
    assert!(page.clicks().is_empty());
    assert_eq!(page.navigations().len(), 2);
    assert!(manager.store().is_fresh(&target(), Duration::from_secs(60)));
    assert_eq!(manager.sessions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn login_form_is_cleared_by_silent_sso() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(
        ScriptedPage::new(login_form())
            .showing(&sso_link())
            .on_click(&sso_link(), home()),
    );
    let (manager, _launcher) = manager(&dir, vec![page.clone()], true);

    let handle = manager.ensure_authenticated(&target()).await.unwrap();

    assert!(handle.is_authenticated());
    assert_eq!(handle.record().auto_sso_attempts, 1);
    assert_eq!(page.clicks(), vec![sso_link().to_string()]);

    let guard = handle.acquire().await.unwrap();
    assert_eq!(guard.current_url().await.unwrap(), format!("{HOST}/home"));
}

#[tokio::test(start_paused = true)]
async fn unsettled_page_is_polled_until_definitive() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(
        ScriptedPage::new(still_loading())
            .then_snapshots(vec![still_loading(), still_loading(), home()]),
    );
    let (manager, _launcher) = manager(&dir, vec![page], true);

    let handle = manager.ensure_authenticated(&target()).await.unwrap();

    assert!(handle.is_authenticated());
    assert_eq!(handle.record().auto_sso_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_login_without_operator_yields_unusable_handle() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(ScriptedPage::new(login_form()));
    let (manager, _launcher) = manager(&dir, vec![page], true);

    let handle = manager.ensure_authenticated(&target()).await.unwrap();
    let record = handle.record();
    assert_eq!(record.auth_state, AuthState::Failed);
    assert!(record
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("needs_human"));

    match handle.acquire().await {
        Err(PortalError::Authentication { target, .. }) => assert_eq!(target, "acme.example.com"),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("acquire must fail on an unauthenticated session"),
    }
    assert!(!manager.store().is_fresh(&target(), Duration::from_secs(60)));
}

#[tokio::test]
async fn logout_without_session_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, launcher) = manager(&dir, Vec::new(), true);

    manager.logout(&target()).await.unwrap();
    manager.logout(&target()).await.unwrap();
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn logout_closes_page_and_forgets_credential() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(ScriptedPage::new(home()));
    let (manager, _launcher) = manager(&dir, vec![page.clone()], true);

    manager.ensure_authenticated(&target()).await.unwrap();
    manager.logout(&target()).await.unwrap();

    assert!(page.is_closed());
    assert!(manager.sessions().is_empty());
    assert!(!manager.store().handle_for(&target()).profile_dir.exists());
}

#[tokio::test]
async fn check_status_without_credential_does_not_launch() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, launcher) = manager(&dir, Vec::new(), true);

    assert!(!manager.check_status(&target()).await.unwrap());
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn check_status_reports_without_remediation() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(ScriptedPage::new(home()).showing(&sso_link()));
    let (manager, _launcher) = manager(&dir, vec![page.clone()], true);

    manager.ensure_authenticated(&target()).await.unwrap();
    assert!(manager.check_status(&target()).await.unwrap());

    page.set_snapshot(login_form());
    assert!(!manager.check_status(&target()).await.unwrap());
    assert!(page.clicks().is_empty());
    assert_eq!(manager.sessions()[0].auth_state, AuthState::OnLoginForm);
}

#[tokio::test]
async fn unknown_target_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _launcher) = manager(&dir, Vec::new(), true);
    let other = TargetIdentity::parse("https://elsewhere.example").unwrap();

    let err = manager.ensure_authenticated(&other).await.err().unwrap();
    assert!(matches!(err, PortalError::UnknownTarget(_)));
}

struct ConfirmingOperator {
    page: Arc<ScriptedPage>,
}

#[async_trait]
impl InteractionChannel for ConfirmingOperator {
    async fn request_login(&self, _target: &TargetIdentity, _reason: &str) -> HumanSignal {
        self.page.set_snapshot(home());
        HumanSignal::Confirmed
    }
}

#[tokio::test(start_paused = true)]
async fn operator_login_in_a_headed_window_returns_to_headless() {
    let dir = tempfile::tempdir().unwrap();
    let headless = Arc::new(ScriptedPage::new(login_form()));
    let headed = Arc::new(ScriptedPage::new(login_form()));
    let restored = Arc::new(ScriptedPage::new(home()));
    let launcher = Arc::new(ScriptedLauncher::new(vec![
        headless.clone(),
        headed.clone(),
        restored.clone(),
    ]));
    let manager = SessionManager::new(
        launcher.clone(),
        CredentialStore::new(dir.path()),
        SessionPolicy::default(),
    )
    .with_interaction(Arc::new(ConfirmingOperator {
        page: headed.clone(),
    }));
    manager.register(Arc::new(Intranet::new()), None);

    let handle = manager.ensure_authenticated(&target()).await.unwrap();

    assert!(handle.is_authenticated());
    assert!(handle.record().headless);
    assert!(headless.is_closed());
    assert!(headed.is_closed());
    assert!(!restored.is_closed());
    let requests = launcher.requests();
    let modes: Vec<bool> = requests.iter().map(|request| request.headless).collect();
    assert_eq!(modes, [true, false, true]);
    assert_eq!(requests[0].profile_dir, requests[1].profile_dir);
    assert_eq!(requests[1].profile_dir, requests[2].profile_dir);
    assert!(manager.store().load_marker(&target()).unwrap().headless);

    let guard = handle.acquire().await.unwrap();
    assert_eq!(guard.current_url().await.unwrap(), format!("{HOST}/home"));
}

struct SilentOperator {
    prompted: Arc<Notify>,
}

#[async_trait]
impl InteractionChannel for SilentOperator {
    async fn request_login(&self, _target: &TargetIdentity, _reason: &str) -> HumanSignal {
        self.prompted.notify_one();
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_a_pending_interactive_wait() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(ScriptedPage::new(login_form()));
    let prompted = Arc::new(Notify::new());
    let launcher = Arc::new(ScriptedLauncher::new(vec![page.clone()]));
    let manager = Arc::new(
        SessionManager::new(
            launcher,
            CredentialStore::new(dir.path()),
            SessionPolicy {
                headless: false,
                ..SessionPolicy::default()
            },
        )
        .with_interaction(Arc::new(SilentOperator {
            prompted: prompted.clone(),
        })),
    );
    manager.register(Arc::new(Intranet::new()), None);

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ensure_authenticated(&target()).await })
    };
    prompted.notified().await;
    manager.shutdown().await;

    match task.await.unwrap() {
        Err(PortalError::Authentication { reason, .. }) => {
            assert_eq!(reason, "interactive login cancelled")
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("a cancelled login must not yield a handle"),
    }
    assert!(page.is_closed());
}

#[tokio::test(start_paused = true)]
async fn cancel_login_stops_one_target_only() {
    let dir = tempfile::tempdir().unwrap();
    let wiki_page = Arc::new(ScriptedPage::new(wiki_home()));
    let stuck = Arc::new(ScriptedPage::new(login_form()));
    let prompted = Arc::new(Notify::new());
    let launcher = Arc::new(ScriptedLauncher::new(vec![wiki_page.clone(), stuck.clone()]));
    let manager = Arc::new(
        SessionManager::new(
            launcher.clone(),
            CredentialStore::new(dir.path()),
            SessionPolicy {
                headless: false,
                ..SessionPolicy::default()
            },
        )
        .with_interaction(Arc::new(SilentOperator {
            prompted: prompted.clone(),
        })),
    );
    manager.register(Arc::new(Intranet::new()), None);
    manager.register(Arc::new(Intranet::at(WIKI)), None);
    let wiki = TargetIdentity::parse(WIKI).unwrap();

    let wiki_handle = manager.ensure_authenticated(&wiki).await.unwrap();
    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ensure_authenticated(&target()).await })
    };
    prompted.notified().await;
    assert!(manager.cancel_login(&target()));

    match task.await.unwrap() {
        Err(PortalError::Authentication { target, reason }) => {
            assert_eq!(target, "acme.example.com");
            assert_eq!(reason, "interactive login cancelled");
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("a cancelled login must not yield a handle"),
    }
    assert!(stuck.is_closed());

    assert!(!wiki_page.is_closed());
    assert!(wiki_handle.is_authenticated());
    let guard = wiki_handle.acquire().await.unwrap();
    assert_eq!(guard.current_url().await.unwrap(), format!("{WIKI}/home"));
    assert!(manager.store().load_marker(&wiki).is_some());
    assert_eq!(launcher.launch_count(), 2);
}

#[tokio::test]
async fn cancel_login_without_session_reports_nothing_to_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _launcher) = manager(&dir, Vec::new(), true);
    assert!(!manager.cancel_login(&target()));
}

#[tokio::test(start_paused = true)]
async fn identity_provider_redirect_is_awaited() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(
        ScriptedPage::new(idp_login()).then_snapshots(vec![idp_login(), idp_login(), home()]),
    );
    let (manager, _launcher) = manager(&dir, vec![page.clone()], true);

    let started = tokio::time::Instant::now();
    let handle = manager.ensure_authenticated(&target()).await.unwrap();

    assert!(handle.is_authenticated());
    assert_eq!(handle.record().auto_sso_attempts, 0);
    assert!(page.clicks().is_empty());
    assert!(started.elapsed() < SessionPolicy::default().idp_wait);
    assert!(manager.store().load_marker(&target()).is_some());
}

#[tokio::test(start_paused = true)]
async fn identity_provider_that_never_returns_fails_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(ScriptedPage::new(idp_login()));
    let (manager, _launcher) = manager(&dir, vec![page], true);

    let started = tokio::time::Instant::now();
    let handle = manager.ensure_authenticated(&target()).await.unwrap();

    let record = handle.record();
    assert_eq!(record.auth_state, AuthState::Failed);
    assert!(record
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("identity provider did not redirect back"));
    assert!(started.elapsed() >= SessionPolicy::default().idp_wait);
    assert!(manager.store().load_marker(&target()).is_none());
}

#[tokio::test(start_paused = true)]
async fn expired_live_session_is_disposed_with_its_credential() {
    let dir = tempfile::tempdir().unwrap();
    let page = Arc::new(ScriptedPage::new(home()));
    let launcher = Arc::new(ScriptedLauncher::new(vec![page.clone()]));
    let manager = SessionManager::new(
        launcher.clone(),
        CredentialStore::new(dir.path()),
        SessionPolicy {
            ttl: Duration::from_millis(1),
            ..SessionPolicy::default()
        },
    );
    manager.register(Arc::new(Intranet::new()), None);

    let first = manager.ensure_authenticated(&target()).await.unwrap();
    assert!(first.is_authenticated());
    assert!(manager.store().load_marker(&target()).is_some());

    // Expiry is judged on the wall clock, which the paused runtime does not move.
    std::thread::sleep(Duration::from_millis(20));

    assert!(!manager.check_status(&target()).await.unwrap());
    assert!(page.is_closed());
    assert!(manager.sessions().is_empty());
    assert!(manager.store().load_marker(&target()).is_none());
    assert_eq!(launcher.launch_count(), 1);

    let fresh = Arc::new(ScriptedPage::new(home()));
    launcher.push(fresh.clone());
    let second = manager.ensure_authenticated(&target()).await.unwrap();
    assert!(second.is_authenticated());
    assert_ne!(second.record().session_id, first.record().session_id);
    assert_eq!(launcher.launch_count(), 2);
}

/// Holds launches for one label until released.
struct GatedLauncher {
    held: String,
    entered: Arc<Notify>,
    gate: Arc<Notify>,
    pages: ScriptedLauncher,
}

#[async_trait]
impl PageLauncher for GatedLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn BrowserPage>, AdapterError> {
        if request.label == self.held {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        self.pages.launch(request).await
    }
}

#[tokio::test(start_paused = true)]
async fn slow_launch_does_not_hold_up_other_targets() {
    let dir = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let launcher = Arc::new(GatedLauncher {
        held: "acme.example.com".into(),
        entered: entered.clone(),
        gate: gate.clone(),
        pages: ScriptedLauncher::new(vec![
            Arc::new(ScriptedPage::new(wiki_home())),
            Arc::new(ScriptedPage::new(home())),
        ]),
    });
    let manager = Arc::new(SessionManager::new(
        launcher,
        CredentialStore::new(dir.path()),
        SessionPolicy::default(),
    ));
    manager.register(Arc::new(Intranet::new()), None);
    manager.register(Arc::new(Intranet::at(WIKI)), None);
    let wiki = TargetIdentity::parse(WIKI).unwrap();

    let slow = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ensure_authenticated(&target()).await })
    };
    entered.notified().await;

    let wiki_handle = tokio::time::timeout(
        Duration::from_secs(60),
        manager.ensure_authenticated(&wiki),
    )
    .await
    .expect("wiki login waited on another target's launch")
    .unwrap();
    assert!(wiki_handle.is_authenticated());

    gate.notify_one();
    let handle = slow.await.unwrap().unwrap();
    assert!(handle.is_authenticated());
}
