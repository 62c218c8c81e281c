use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{BrowserPage, LaunchRequest, PageLauncher};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use portal_core_types::{
    poll_until, poll_until_some, retry_once_on_timeout, LoginState, PortalError, SnapshotProbe,
    TargetAdapter, TargetIdentity, WaitPolicy,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auto_sso::{dismiss_popups, AutoSsoDriver, AutoSsoSettings};
use crate::classifier::LoginClassifier;
use crate::credential::{CredentialStore, SessionMarker};
use crate::interaction::{HumanSignal, InteractionChannel};
use crate::model::{SessionPolicy, SessionRecord};

const STEP_PAUSE: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct TargetBinding {
    adapter: Arc<dyn TargetAdapter>,
    classifier: LoginClassifier,
    sso_account: Option<String>,
}

/// One live browser page plus the record describing its login state.
///
/// The page mutex is the per-target operation queue.
struct SessionSlot {
    record: RwLock<SessionRecord>,
    page: Arc<Mutex<Arc<dyn BrowserPage>>>,
    cancel: CancellationToken,
}

impl SessionSlot {
    fn is_live(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        // Locked means an operation is running on it.
        self.page
            .try_lock()
            .map(|page| page.is_alive())
            .unwrap_or(true)
    }

    async fn release(&self) {
        self.cancel.cancel();
        let page = self.page.lock().await;
        if let Err(err) = page.close().await {
            debug!(target: "session-center", %err, "page close failed during release");
        }
    }
}

enum HumanWait {
    Confirmed,
    Detected,
    Declined,
    Cancelled,
    TimedOut,
}

/// Owns one session per target identity and keeps it authenticated.
pub struct SessionManager {
    launcher: Arc<dyn PageLauncher>,
    store: CredentialStore,
    policy: SessionPolicy,
    interaction: Option<Arc<dyn InteractionChannel>>,
    targets: DashMap<TargetIdentity, TargetBinding>,
    sessions: DashMap<TargetIdentity, Arc<SessionSlot>>,
    /// Serializes slot creation per target; other targets launch in parallel.
    creation: DashMap<TargetIdentity, Arc<Mutex<()>>>,
    shutdown: CancellationToken,
    auto_sso: AutoSsoDriver,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn PageLauncher>, store: CredentialStore, policy: SessionPolicy) -> Self {
        let auto_sso = AutoSsoDriver::new(AutoSsoSettings {
            timeout: policy.auto_sso_timeout,
            poll_interval: policy.poll_interval,
            step_pause: STEP_PAUSE,
        });
        Self {
            launcher,
            store,
            policy,
            interaction: None,
            targets: DashMap::new(),
            sessions: DashMap::new(),
            creation: DashMap::new(),
            shutdown: CancellationToken::new(),
            auto_sso,
        }
    }

    pub fn with_interaction(mut self, channel: Arc<dyn InteractionChannel>) -> Self {
        self.interaction = Some(channel);
        self
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Makes `adapter`'s target known. Re-registering replaces the adapter.
    pub fn register(&self, adapter: Arc<dyn TargetAdapter>, sso_account: Option<String>) {
        let target = adapter.target().clone();
        let classifier = LoginClassifier::for_adapter(adapter.as_ref());
        info!(target: "session-center", target_key = %target.key(), kind = adapter.kind(), "target registered");
        self.targets.insert(
            target,
            TargetBinding {
                adapter,
                classifier,
                sso_account,
            },
        );
    }

    pub fn targets(&self) -> Vec<TargetIdentity> {
        let mut targets: Vec<_> = self.targets.iter().map(|entry| entry.key().clone()).collect();
        targets.sort_by_key(|target| target.key());
        targets
    }

    pub fn adapter(&self, target: &TargetIdentity) -> Result<Arc<dyn TargetAdapter>, PortalError> {
        Ok(self.binding(target)?.adapter)
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.sessions
            .iter()
            .map(|entry| entry.value().record.read().clone())
            .collect()
    }

    /// Validates (and if needed re-establishes) the session for `target`.
    ///
    /// A session that could not be authenticated comes back as a handle whose
    /// record is `Failed`; only structural problems are errors.
    pub async fn ensure_authenticated(
        &self,
        target: &TargetIdentity,
    ) -> Result<SessionHandle, PortalError> {
        let binding = self.binding(target)?;
        let slot = self.slot_for(target).await?;

        {
            let mut page = slot.page.lock().await;
            slot.record.write().begin_validation();
            if let Err(err) = self.authenticate(&slot, &binding, &mut page).await {
                slot.record.write().fail(err.to_string());
                return Err(err);
            }
        }

        let record = slot.record.read().clone();
        info!(
            target: "session-center",
            target_key = %target.key(),
            session_id = %record.session_id,
            auth_state = ?record.auth_state,
            "session validated"
        );
        Ok(SessionHandle {
            slot,
            adapter: binding.adapter,
        })
    }

    /// Re-classifies the landing page without any remediation.
    pub async fn check_status(&self, target: &TargetIdentity) -> Result<bool, PortalError> {
        let binding = self.binding(target)?;
        let slot = match self.live_slot(target).await {
            Some(slot) => slot,
            None if self.store.is_fresh(target, self.policy.ttl) => self.slot_for(target).await?,
            None => {
                debug!(target: "session-center", target_key = %target.key(), "no session and no saved credential");
                return Ok(false);
            }
        };

        let page = slot.page.lock().await;
        self.visit_landing(&binding, &**page).await?;
        let state = self.observe(&slot, &binding, &**page).await?;
        Ok(state == LoginState::LoggedIn)
    }

    /// Drops the session and its persisted credential. Unknown targets are fine.
    pub async fn logout(&self, target: &TargetIdentity) -> Result<(), PortalError> {
        if let Some((_, slot)) = self.sessions.remove(target) {
            slot.release().await;
            info!(target: "session-center", target_key = %target.key(), "session discarded");
        }
        self.store.delete(target)?;
        Ok(())
    }

    /// Cancels the pending login wait of `target` only. The slot is replaced on
    /// next use. Returns whether there was a session to cancel.
    pub fn cancel_login(&self, target: &TargetIdentity) -> bool {
        let Some(slot) = self.sessions.get(target).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        info!(target: "session-center", target_key = %target.key(), "login cancelled by caller");
        slot.cancel.cancel();
        true
    }

    /// Cancels every pending wait and closes all pages. Credentials are kept.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let targets: Vec<_> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for target in targets {
            if let Some((_, slot)) = self.sessions.remove(&target) {
                slot.release().await;
            }
        }
    }

    fn binding(&self, target: &TargetIdentity) -> Result<TargetBinding, PortalError> {
        self.targets
            .get(target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PortalError::UnknownTarget(target.key()))
    }

    /// Current slot when it can still serve; expired ones are disposed here.
    async fn live_slot(&self, target: &TargetIdentity) -> Option<Arc<SessionSlot>> {
        let slot = self.sessions.get(target).map(|entry| Arc::clone(entry.value()))?;
        let expired = slot.record.read().is_expired_at(Utc::now());
        if expired {
            info!(target: "session-center", target_key = %target.key(), "session ttl elapsed; disposing");
            self.sessions.remove(target);
            slot.release().await;
            if let Err(err) = self.store.delete(target) {
                warn!(target: "session-center", %err, "failed to delete expired credential");
            }
            return None;
        }
        slot.is_live().then_some(slot)
    }

    async fn slot_for(&self, target: &TargetIdentity) -> Result<Arc<SessionSlot>, PortalError> {
        if let Some(slot) = self.live_slot(target).await {
            return Ok(slot);
        }

        let lock = Arc::clone(&self.creation.entry(target.clone()).or_default());
        let _creation = lock.lock().await;
        if let Some(slot) = self.live_slot(target).await {
            return Ok(slot);
        }

        let slot = Arc::new(self.open_slot(target).await?);
        if let Some(previous) = self.sessions.insert(target.clone(), Arc::clone(&slot)) {
            previous.release().await;
        }
        Ok(slot)
    }

    async fn open_slot(&self, target: &TargetIdentity) -> Result<SessionSlot, PortalError> {
        self.store.purge_if_expired(target, self.policy.ttl)?;
        let saved = self.store.is_fresh(target, self.policy.ttl);
        let handle = self.store.prepare(target)?;

        let page = self
            .launcher
            .launch(LaunchRequest {
                profile_dir: handle.profile_dir.clone(),
                headless: self.policy.headless,
                label: target.key(),
            })
            .await?;

        let mut record = SessionRecord::new(target.clone(), self.policy.ttl, self.policy.headless);
        if saved {
            record.credential_handle = Some(handle.profile_dir);
        }
        info!(
            target: "session-center",
            target_key = %target.key(),
            session_id = %record.session_id,
            saved_credential = saved,
            headless = self.policy.headless,
            "session opened"
        );
        Ok(SessionSlot {
            record: RwLock::new(record),
            page: Arc::new(Mutex::new(page)),
            cancel: self.shutdown.child_token(),
        })
    }

    async fn authenticate(
        &self,
        slot: &SessionSlot,
        binding: &TargetBinding,
        page: &mut Arc<dyn BrowserPage>,
    ) -> Result<(), PortalError> {
        self.visit_landing(binding, page.as_ref()).await?;
        let mut state = self.observe(slot, binding, page.as_ref()).await?;

        if state == LoginState::Unknown {
            state = self.settle(slot, binding, page.as_ref()).await;
        }

        let reason = match state {
            LoginState::LoggedIn => {
                self.finish(slot, binding, page.as_ref(), true).await;
                return Ok(());
            }
            LoginState::OnLoginForm | LoginState::OnSsoIntermediate => {
                slot.record.write().auto_sso_attempts += 1;
                let outcome = self
                    .auto_sso
                    .run(
                        page.as_ref(),
                        binding.adapter.as_ref(),
                        &binding.classifier,
                        binding.sso_account.as_deref(),
                    )
                    .await;
                if outcome.success() {
                    slot.record.write().observe(LoginState::LoggedIn);
                    self.finish(slot, binding, page.as_ref(), false).await;
                    return Ok(());
                }
                let latest = self.observe(slot, binding, page.as_ref()).await?;
                if latest == LoginState::LoggedIn {
                    self.finish(slot, binding, page.as_ref(), true).await;
                    return Ok(());
                }
                format!("automatic sso ended with {outcome}")
            }
            LoginState::OnIdpPage => {
                if self.wait_for_idp(slot, binding, page.as_ref()).await == LoginState::LoggedIn {
                    self.finish(slot, binding, page.as_ref(), true).await;
                    return Ok(());
                }
                if slot.cancel.is_cancelled() {
                    return Err(cancelled(binding));
                }
                "identity provider did not redirect back".to_string()
            }
            LoginState::Unknown => "login state never became definitive".to_string(),
        };

        self.fallback(slot, binding, page, reason).await
    }

    async fn visit_landing(
        &self,
        binding: &TargetBinding,
        page: &dyn BrowserPage,
    ) -> Result<(), PortalError> {
        let url = binding.adapter.landing_url();
        let url = url.as_str();
        let timeout = self.policy.navigation_timeout;
        retry_once_on_timeout("landing", || async move {
            page.navigate(url, WaitPolicy::Load, timeout)
                .await
                .map_err(PortalError::from)
        })
        .await
    }

    async fn observe(
        &self,
        slot: &SessionSlot,
        binding: &TargetBinding,
        page: &dyn BrowserPage,
    ) -> Result<LoginState, PortalError> {
        let snapshot = page.snapshot(&binding.adapter.snapshot_probe()).await?;
        let state = binding.classifier.classify(&snapshot);
        debug!(
            target: "session-center",
            url = %snapshot.url,
            nav_hits = snapshot.nav_hits,
            login_form = snapshot.login_form,
            state = ?state,
            "classified page"
        );
        slot.record.write().observe(state);
        Ok(state)
    }

    async fn settle(
        &self,
        slot: &SessionSlot,
        binding: &TargetBinding,
        page: &dyn BrowserPage,
    ) -> LoginState {
        let probe = binding.adapter.snapshot_probe();
        let (probe, classifier) = (&probe, &binding.classifier);
        let settled = poll_until_some(self.policy.poll_interval, self.policy.settle_timeout, || async move {
            probe_state(page, probe, classifier)
                .await
                .filter(|state| *state != LoginState::Unknown)
        })
        .await
        .unwrap_or(LoginState::Unknown);
        slot.record.write().observe(settled);
        settled
    }

    async fn wait_for_idp(
        &self,
        slot: &SessionSlot,
        binding: &TargetBinding,
        page: &dyn BrowserPage,
    ) -> LoginState {
        let probe = binding.adapter.snapshot_probe();
        let (probe, classifier) = (&probe, &binding.classifier);
        let redirected = poll_until_some(self.policy.poll_interval, self.policy.idp_wait, || async move {
            probe_state(page, probe, classifier).await.filter(|state| {
                matches!(state, LoginState::LoggedIn | LoginState::OnLoginForm)
            })
        });
        let state = tokio::select! {
            _ = slot.cancel.cancelled() => None,
            state = redirected => state,
        }
        .unwrap_or(LoginState::OnIdpPage);
        slot.record.write().observe(state);
        state
    }

    async fn fallback(
        &self,
        slot: &SessionSlot,
        binding: &TargetBinding,
        page: &mut Arc<dyn BrowserPage>,
        reason: String,
    ) -> Result<(), PortalError> {
        let target = binding.adapter.target();
        let Some(channel) = self.interaction.clone() else {
            warn!(target: "session-center", target_key = %target.key(), %reason, "authentication failed; no interactive channel");
            slot.record.write().fail(reason);
            return Ok(());
        };

        if slot.cancel.is_cancelled() {
            return Err(cancelled(binding));
        }
        if slot.record.read().headless {
            self.relaunch(slot, binding, page, false).await?;
        }

        info!(target: "session-center", target_key = %target.key(), %reason, "waiting for interactive login");
        let outcome = {
            let watched = Arc::clone(page);
            let probe = binding.adapter.snapshot_probe();
            let (probe, classifier) = (&probe, &binding.classifier);
            let watched: &dyn BrowserPage = watched.as_ref();
            let detect = poll_until(self.policy.poll_interval, Duration::MAX, || async move {
                probe_state(watched, probe, classifier).await == Some(LoginState::LoggedIn)
            });
            let deadline = async {
                match self.policy.interactive_timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = slot.cancel.cancelled() => HumanWait::Cancelled,
                signal = channel.request_login(target, &reason) => match signal {
                    HumanSignal::Confirmed => HumanWait::Confirmed,
                    HumanSignal::Cancelled => HumanWait::Declined,
                },
                _ = detect => HumanWait::Detected,
                _ = deadline => HumanWait::TimedOut,
            }
        };

        match outcome {
            HumanWait::Detected => {
                slot.record.write().observe(LoginState::LoggedIn);
                self.after_interactive_login(slot, binding, page).await?;
            }
            HumanWait::Confirmed => {
                self.visit_landing(binding, page.as_ref()).await?;
                match self.observe(slot, binding, page.as_ref()).await? {
                    LoginState::LoggedIn => self.after_interactive_login(slot, binding, page).await?,
                    other => slot
                        .record
                        .write()
                        .fail(format!("still {other:?} after operator confirmation")),
                }
            }
            HumanWait::Declined => slot.record.write().fail("operator declined interactive login"),
            HumanWait::TimedOut => slot.record.write().fail("interactive login timed out"),
            HumanWait::Cancelled => {
                warn!(target: "session-center", target_key = %target.key(), "interactive login cancelled");
                if let Err(err) = page.close().await {
                    debug!(target: "session-center", %err, "page close failed after cancellation");
                }
                return Err(cancelled(binding));
            }
        }
        Ok(())
    }

    /// Persists the login, then moves a session that was opened headed only
    /// for the operator back to a headless browser on the same profile.
    async fn after_interactive_login(
        &self,
        slot: &SessionSlot,
        binding: &TargetBinding,
        page: &mut Arc<dyn BrowserPage>,
    ) -> Result<(), PortalError> {
        self.finish(slot, binding, page.as_ref(), true).await;
        if !self.policy.headless || slot.record.read().headless {
            return Ok(());
        }

        self.relaunch(slot, binding, page, true).await?;
        match self.observe(slot, binding, page.as_ref()).await? {
            LoginState::LoggedIn => self.finish(slot, binding, page.as_ref(), true).await,
            other => slot
                .record
                .write()
                .fail(format!("still {other:?} after switching back to headless")),
        }
        Ok(())
    }

    /// Replaces the page with a fresh browser on the target's profile.
    async fn relaunch(
        &self,
        slot: &SessionSlot,
        binding: &TargetBinding,
        page: &mut Arc<dyn BrowserPage>,
        headless: bool,
    ) -> Result<(), PortalError> {
        let target = binding.adapter.target();
        info!(target: "session-center", target_key = %target.key(), headless, "relaunching browser");
        if let Err(err) = page.close().await {
            debug!(target: "session-center", %err, "page close failed before relaunch");
        }
        let handle = self.store.prepare(target)?;
        *page = self
            .launcher
            .launch(LaunchRequest {
                profile_dir: handle.profile_dir,
                headless,
                label: target.key(),
            })
            .await?;
        slot.record.write().headless = headless;
        self.visit_landing(binding, page.as_ref()).await
    }

    /// Persists the credential marker for a session that just reached `LoggedIn`.
    async fn finish(
        &self,
        slot: &SessionSlot,
        binding: &TargetBinding,
        page: &dyn BrowserPage,
        dismiss: bool,
    ) {
        if dismiss {
            dismiss_popups(page, binding.adapter.popup_dismissals()).await;
        }
        let target = binding.adapter.target();
        let marker = {
            let record = slot.record.read();
            SessionMarker {
                target: target.key(),
                session_id: record.session_id.clone(),
                authenticated_at: record.last_validated_at.unwrap_or_else(Utc::now),
                headless: record.headless,
            }
        };
        match self.store.persist(target, &marker) {
            Ok(handle) => slot.record.write().credential_handle = Some(handle.profile_dir),
            Err(err) => warn!(target: "session-center", %err, "failed to persist session marker"),
        }
    }
}

fn cancelled(binding: &TargetBinding) -> PortalError {
    PortalError::authentication(binding.adapter.target().key(), "interactive login cancelled")
}

async fn probe_state(
    page: &dyn BrowserPage,
    probe: &SnapshotProbe,
    classifier: &LoginClassifier,
) -> Option<LoginState> {
    match page.snapshot(probe).await {
        Ok(snapshot) => Some(classifier.classify(&snapshot)),
        Err(err) => {
            debug!(target: "session-center", %err, "snapshot failed while polling");
            None
        }
    }
}

/// Caller's view of one target's session.
#[derive(Clone)]
pub struct SessionHandle {
    slot: Arc<SessionSlot>,
    adapter: Arc<dyn TargetAdapter>,
}

impl SessionHandle {
    pub fn target(&self) -> &TargetIdentity {
        self.adapter.target()
    }

    pub fn adapter(&self) -> Arc<dyn TargetAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn record(&self) -> SessionRecord {
        self.slot.record.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.slot.record.read().is_authenticated()
    }

    /// Cancels a pending interactive wait; the record ends up `Failed`.
    pub fn cancel(&self) {
        self.slot.cancel.cancel();
    }

    /// Waits for exclusive use of the page. Fails fast when not authenticated.
    pub async fn acquire(&self) -> Result<SessionGuard, PortalError> {
        self.require_authenticated()?;
        let page = Arc::clone(&self.slot.page).lock_owned().await;
        self.require_authenticated()?;
        Ok(SessionGuard { page })
    }

    fn require_authenticated(&self) -> Result<(), PortalError> {
        let record = self.slot.record.read();
        if record.is_authenticated() {
            return Ok(());
        }
        let reason = record
            .failure_reason
            .clone()
            .unwrap_or_else(|| format!("session is {:?}", record.auth_state));
        Err(PortalError::authentication(self.target().key(), reason))
    }
}

/// Exclusive access to an authenticated page; dropping it lets the next
/// operation for the same target proceed.
pub struct SessionGuard {
    page: OwnedMutexGuard<Arc<dyn BrowserPage>>,
}

impl SessionGuard {
    pub fn page(&self) -> Arc<dyn BrowserPage> {
        Arc::clone(&self.page)
    }
}

impl Deref for SessionGuard {
    type Target = dyn BrowserPage;

    fn deref(&self) -> &Self::Target {
        &**self.page
    }
}
