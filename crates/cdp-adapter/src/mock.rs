//! Scripted stand-ins for [`BrowserPage`] and [`PageLauncher`], used by the
//! session and retrieval tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use portal_core_types::{Locator, PageSnapshot, SnapshotProbe, WaitPolicy};
use serde_json::Value;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::{BrowserPage, ElementState, LaunchRequest, PageLauncher};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageAction {
    Navigate(String),
    Click(String),
    Fill { locator: String, value: String },
    Evaluate(String),
    Close,
}

type Evaluator = Box<dyn Fn(&str, &Value) -> Result<Value, AdapterError> + Send + Sync>;

#[derive(Default)]
struct ScriptState {
    snapshot: PageSnapshot,
    queued: VecDeque<PageSnapshot>,
    visible: HashSet<String>,
    on_click: HashMap<String, PageSnapshot>,
    on_fill: HashMap<String, PageSnapshot>,
    on_navigate: Vec<(String, PageSnapshot)>,
    navigate_failures: VecDeque<AdapterError>,
    actions: Vec<PageAction>,
    closed: bool,
}

/// A page whose observable state is driven by the test.
///
/// Locators are matched by their `Display` form. Clicks, fills and navigations
/// can swap the current snapshot, which is how a login flow is simulated.
pub struct ScriptedPage {
    state: Mutex<ScriptState>,
    evaluator: Mutex<Option<Evaluator>>,
}

impl ScriptedPage {
    pub fn new(snapshot: PageSnapshot) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                snapshot,
                ..ScriptState::default()
            }),
            evaluator: Mutex::new(None),
        }
    }

    pub fn logged_in(url: &str) -> Self {
        Self::new(PageSnapshot {
            url: url.to_string(),
            title: "Home".into(),
            nav_hits: 5,
            ..PageSnapshot::default()
        })
    }

    pub fn showing(self, locator: &Locator) -> Self {
        self.state.lock().visible.insert(locator.to_string());
        self
    }

    pub fn on_click(self, locator: &Locator, next: PageSnapshot) -> Self {
        self.state.lock().on_click.insert(locator.to_string(), next);
        self
    }

    pub fn on_fill(self, locator: &Locator, next: PageSnapshot) -> Self {
        self.state.lock().on_fill.insert(locator.to_string(), next);
        self
    }

    /// Navigations whose URL contains `fragment` land on `next`.
    pub fn on_navigate(self, fragment: &str, next: PageSnapshot) -> Self {
        self.state
            .lock()
            .on_navigate
            .push((fragment.to_string(), next));
        self
    }

    /// Snapshots returned (in order) by the next `snapshot` calls; the last one sticks.
    pub fn then_snapshots(self, snapshots: Vec<PageSnapshot>) -> Self {
        self.state.lock().queued.extend(snapshots);
        self
    }

    pub fn failing_navigation(self, err: AdapterError) -> Self {
        self.state.lock().navigate_failures.push_back(err);
        self
    }

    pub fn with_evaluator<F>(self, evaluator: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, AdapterError> + Send + Sync + 'static,
    {
        *self.evaluator.lock() = Some(Box::new(evaluator));
        self
    }

    pub fn set_snapshot(&self, snapshot: PageSnapshot) {
        let mut state = self.state.lock();
        state.queued.clear();
        state.snapshot = snapshot;
    }

    pub fn show(&self, locator: &Locator) {
        self.state.lock().visible.insert(locator.to_string());
    }

    pub fn actions(&self) -> Vec<PageAction> {
        self.state.lock().actions.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                PageAction::Click(locator) => Some(locator),
                _ => None,
            })
            .collect()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                PageAction::Navigate(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.state.lock().closed {
            Err(AdapterError::new(AdapterErrorKind::PageClosed).with_hint("scripted page closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn navigate(
        &self,
        url: &str,
        _wait: WaitPolicy,
        _timeout: Duration,
    ) -> Result<(), AdapterError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.actions.push(PageAction::Navigate(url.to_string()));
        if let Some(err) = state.navigate_failures.pop_front() {
            return Err(err);
        }
        let next = state
            .on_navigate
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, snapshot)| snapshot.clone());
        if let Some(next) = next {
            state.queued.clear();
            state.snapshot = next;
        }
        Ok(())
    }

    async fn evaluate(&self, function: &str, args: Value) -> Result<Value, AdapterError> {
        self.ensure_open()?;
        self.state
            .lock()
            .actions
            .push(PageAction::Evaluate(function.to_string()));
        match self.evaluator.lock().as_ref() {
            Some(evaluator) => evaluator(function, &args),
            None => Ok(Value::Null),
        }
    }

    async fn query(&self, locator: &Locator) -> Result<Option<ElementState>, AdapterError> {
        self.ensure_open()?;
        let visible = self.state.lock().visible.contains(&locator.to_string());
        Ok(visible.then_some(ElementState {
            visible: true,
            x: 10.0,
            y: 10.0,
        }))
    }

    async fn click(&self, locator: &Locator, _timeout: Duration) -> Result<(), AdapterError> {
        self.ensure_open()?;
        let key = locator.to_string();
        let mut state = self.state.lock();
        if !state.visible.contains(&key) {
            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("no visible element for {key}")));
        }
        state.actions.push(PageAction::Click(key.clone()));
        if let Some(next) = state.on_click.get(&key).cloned() {
            state.queued.clear();
            state.snapshot = next;
        }
        Ok(())
    }

    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        _timeout: Duration,
    ) -> Result<(), AdapterError> {
        self.ensure_open()?;
        let key = locator.to_string();
        let mut state = self.state.lock();
        if !state.visible.contains(&key) {
            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("no visible element for {key}")));
        }
        state.actions.push(PageAction::Fill {
            locator: key.clone(),
            value: value.to_string(),
        });
        if let Some(next) = state.on_fill.get(&key).cloned() {
            state.queued.clear();
            state.snapshot = next;
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        self.ensure_open()?;
        Ok(self.state.lock().snapshot.url.clone())
    }

    async fn title(&self) -> Result<String, AdapterError> {
        self.ensure_open()?;
        Ok(self.state.lock().snapshot.title.clone())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.actions.push(PageAction::Close);
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.state.lock().closed
    }

    async fn snapshot(&self, _probe: &SnapshotProbe) -> Result<PageSnapshot, AdapterError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if let Some(next) = state.queued.pop_front() {
            state.snapshot = next;
        }
        Ok(state.snapshot.clone())
    }
}

/// Hands out prepared pages in order and records every launch request.
#[derive(Default)]
pub struct ScriptedLauncher {
    pages: Mutex<VecDeque<Arc<ScriptedPage>>>,
    requests: Mutex<Vec<LaunchRequest>>,
}

impl ScriptedLauncher {
    pub fn new(pages: Vec<Arc<ScriptedPage>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, page: Arc<ScriptedPage>) {
        self.pages.lock().push_back(page);
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl PageLauncher for ScriptedLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn BrowserPage>, AdapterError> {
        self.requests.lock().push(request.clone());
        let page: Arc<dyn BrowserPage> = self.pages.lock().pop_front().ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Launch)
                .with_hint(format!("no scripted page left for {}", request.label))
        })?;
        Ok(page)
    }
}
