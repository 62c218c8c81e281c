use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use portal_core_types::{poll_until, poll_until_some, Locator, WaitPolicy};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{AdapterError, AdapterErrorKind};
use crate::transport::{CdpTransport, CommandTarget};
use crate::{metrics, scripts, BrowserPage, ElementState};

const READY_POLL: Duration = Duration::from_millis(100);
const NETWORK_QUIET: Duration = Duration::from_millis(500);

/// Network requests seen on the page session, for the network-idle wait.
#[derive(Debug)]
struct NetworkActivity {
    inflight: HashSet<String>,
    last_activity: Instant,
}

impl NetworkActivity {
    fn is_quiet(&self, window: Duration) -> bool {
        self.inflight.is_empty() && self.last_activity.elapsed() >= window
    }
}

/// A tab driven through a flattened DevTools session.
pub struct CdpPage {
    transport: Arc<dyn CdpTransport>,
    target_id: String,
    session_id: String,
    network: Arc<Mutex<NetworkActivity>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl CdpPage {
    /// Enables the domains the page needs and starts draining transport events.
    pub async fn attach(
        transport: Arc<dyn CdpTransport>,
        target_id: String,
        session_id: String,
    ) -> Result<Self, AdapterError> {
        let network = Arc::new(Mutex::new(NetworkActivity {
            inflight: HashSet::new(),
            last_activity: Instant::now(),
        }));

        let page = Self {
            transport: transport.clone(),
            target_id,
            session_id: session_id.clone(),
            network: network.clone(),
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        };

        for domain in ["Page.enable", "Runtime.enable", "Network.enable"] {
            page.send(domain, json!({})).await?;
        }

        let handle = tokio::spawn(pump_events(transport, session_id, network));
        *page.pump.lock() = Some(handle);
        Ok(page)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(AdapterError::new(AdapterErrorKind::PageClosed)
                .with_hint(format!("{method} on a closed page")));
        }
        self.transport
            .send_command(CommandTarget::Session(self.session_id.clone()), method, params)
            .await
    }

    async fn ready_state(&self) -> Result<String, AdapterError> {
        let value = self.evaluate(scripts::READY_STATE, Value::Null).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn resource_count(&self) -> Result<u64, AdapterError> {
        let value = self.evaluate(scripts::RESOURCE_COUNT, Value::Null).await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    async fn wait_for(&self, policy: WaitPolicy, timeout: Duration) -> bool {
        let accepted: &[&str] = match policy {
            WaitPolicy::DomReady => &["interactive", "complete"],
            WaitPolicy::Load | WaitPolicy::NetworkIdle => &["complete"],
        };
        // last observed resource-entry count and when it last changed
        let resources = Mutex::new((u64::MAX, Instant::now()));
        let resources = &resources;

        poll_until(READY_POLL, timeout, || async move {
            let state = match self.ready_state().await {
                Ok(state) => state,
                Err(err) => {
                    debug!(target: "cdp-page", %err, "readyState probe failed");
                    return false;
                }
            };
            if !accepted.contains(&state.as_str()) {
                return false;
            }
            if policy != WaitPolicy::NetworkIdle {
                return true;
            }

            let count = self.resource_count().await.unwrap_or(0);
            let stable = {
                let mut seen = resources.lock();
                if seen.0 != count {
                    *seen = (count, Instant::now());
                }
                seen.1.elapsed() >= NETWORK_QUIET
            };
            stable && self.network.lock().is_quiet(NETWORK_QUIET)
        })
        .await
    }

    async fn wait_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementState, AdapterError> {
        poll_until_some(READY_POLL, timeout, || async move {
            match self.query(locator).await {
                Ok(Some(state)) if state.visible => Some(state),
                _ => None,
            }
        })
        .await
        .ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("no visible element for {locator}"))
        })
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn navigate(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let started = Instant::now();
        let response = self.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = response.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                metrics::record_navigation(false);
                return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("navigation to {url} failed: {error_text}"))
                    .retriable(true));
            }
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        let settled = self.wait_for(wait, remaining).await;
        metrics::record_navigation(!settled);
        if settled {
            Ok(())
        } else {
            Err(AdapterError::nav_timeout(format!(
                "{url} not ready ({wait:?}) within {}ms",
                timeout.as_millis()
            )))
        }
    }

    async fn evaluate(&self, function: &str, args: Value) -> Result<Value, AdapterError> {
        let expression = format!("({function})({args})");
        let response = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("script threw");
            return Err(AdapterError::script(message.to_string()));
        }

        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn query(&self, locator: &Locator) -> Result<Option<ElementState>, AdapterError> {
        let args = serde_json::to_value(locator)
            .map_err(|err| AdapterError::script(format!("locator encoding failed: {err}")))?;
        let raw = self.evaluate(&scripts::QUERY_ELEMENT, args).await?;
        if raw.is_null() {
            return Ok(None);
        }
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|err| AdapterError::script(format!("unexpected element shape: {err}")))
    }

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<(), AdapterError> {
        let target = self.wait_visible(locator, timeout).await?;

        for event in ["mouseMoved", "mousePressed", "mouseReleased"] {
            let mut params = json!({
                "type": event,
                "x": target.x,
                "y": target.y,
            });
            if event != "mouseMoved" {
                params["button"] = json!("left");
                params["clickCount"] = json!(1);
            }
            self.send("Input.dispatchMouseEvent", params).await?;
        }
        Ok(())
    }

    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        self.wait_visible(locator, timeout).await?;
        let args = serde_json::to_value(locator)
            .map_err(|err| AdapterError::script(format!("locator encoding failed: {err}")))?;

        let focused = self.evaluate(&scripts::FOCUS_AND_CLEAR, args.clone()).await?;
        if focused != Value::Bool(true) {
            return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("could not focus {locator}")));
        }
        self.send("Input.insertText", json!({ "text": value })).await?;
        self.evaluate(&scripts::DISPATCH_CHANGE, args).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        let value = self.evaluate(scripts::CURRENT_URL, Value::Null).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> Result<String, AdapterError> {
        let value = self.evaluate(scripts::TITLE, Value::Null).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }

        let browser = CommandTarget::Browser;
        if let Err(err) = self
            .transport
            .send_command(
                browser.clone(),
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
            )
            .await
        {
            debug!(target: "cdp-page", %err, "closeTarget failed");
        }
        if let Err(err) = self
            .transport
            .send_command(browser, "Browser.close", json!({}))
            .await
        {
            debug!(target: "cdp-page", %err, "Browser.close failed");
        }
        self.transport.shutdown().await;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Relaxed) && self.transport.is_alive()
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

async fn pump_events(
    transport: Arc<dyn CdpTransport>,
    session_id: String,
    network: Arc<Mutex<NetworkActivity>>,
) {
    while let Some(event) = transport.next_event().await {
        metrics::record_event();
        if event.session_id.as_deref() != Some(session_id.as_str()) {
            continue;
        }
        let request_id = event
            .params
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut activity = network.lock();
        match (event.method.as_str(), request_id) {
            ("Network.requestWillBeSent", Some(id)) => {
                activity.inflight.insert(id);
                activity.last_activity = Instant::now();
            }
            ("Network.loadingFinished" | "Network.loadingFailed", Some(id)) => {
                activity.inflight.remove(&id);
                activity.last_activity = Instant::now();
            }
            ("Inspector.detached" | "Target.detachedFromTarget", _) => {
                warn!(target: "cdp-page", session = %session_id, "page session detached");
            }
            _ => {}
        }
    }
    debug!(target: "cdp-page", session = %session_id, "event stream ended");
}
