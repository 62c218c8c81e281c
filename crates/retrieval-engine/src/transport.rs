use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::BrowserPage;
use portal_core_types::{
    poll_until, retry_once_on_timeout, CandidateOperation, OperationCall, PageCall, PortalError,
    ScriptCall,
};
use tracing::debug;

use crate::capture::{Observation, PageCapture, CAPTURE_SCRIPT};
use crate::resolver::OperationTransport;

const READY_POLL: Duration = Duration::from_millis(250);

/// Runs candidates inside an authenticated browser tab.
#[derive(Clone)]
pub struct BrowserOperationTransport {
    page: Arc<dyn BrowserPage>,
}

impl BrowserOperationTransport {
    pub fn new(page: Arc<dyn BrowserPage>) -> Self {
        Self { page }
    }

    async fn run_page(&self, name: &str, call: &PageCall) -> Result<Observation, PortalError> {
        let page = self.page.as_ref();
        retry_once_on_timeout(name, move || async move {
            page.navigate(&call.url, call.wait, call.timeout)
                .await
                .map_err(PortalError::from)
        })
        .await?;

        if !call.ready.is_empty() {
            let ready = poll_until(READY_POLL, call.timeout, move || async move {
                for locator in &call.ready {
                    if page.is_visible(locator).await.unwrap_or(false) {
                        return true;
                    }
                }
                false
            })
            .await;
            if !ready {
                let wanted: Vec<String> = call.ready.iter().map(ToString::to_string).collect();
                return Err(PortalError::Operation(format!(
                    "{name}: none of [{}] appeared within {:?}",
                    wanted.join(", "),
                    call.timeout
                )));
            }
        }

        if !call.settle.is_zero() {
            tokio::time::sleep(call.settle).await;
        }

        let layout = serde_json::to_value(&call.capture)
            .map_err(|err| PortalError::Operation(format!("{name}: bad capture layout: {err}")))?;
        let raw = page.evaluate(CAPTURE_SCRIPT, layout).await?;
        if raw.is_null() {
            return Err(PortalError::Operation(format!("{name}: capture returned nothing")));
        }
        let capture: PageCapture = serde_json::from_value(raw)
            .map_err(|err| PortalError::Operation(format!("{name}: unreadable capture: {err}")))?;
        if call.capture.table.is_some() && capture.table.is_none() {
            return Err(PortalError::Operation(format!("{name}: no list table on {}", capture.url)));
        }
        if call.capture.form.is_some()
            && capture
                .form
                .as_ref()
                .map_or(true, |form| form.classic.is_empty() && form.workspace.is_empty())
        {
            return Err(PortalError::Operation(format!("{name}: no form fields on {}", capture.url)));
        }
        debug!(
            target: "retrieval",
            candidate = name,
            url = %capture.url,
            rows = capture.table.as_ref().map(|table| table.rows.len()).unwrap_or(0),
            cards = capture.cards.len(),
            "page captured"
        );
        Ok(Observation::Page(capture))
    }

    async fn run_script(&self, name: &str, call: &ScriptCall) -> Result<Observation, PortalError> {
        let value = tokio::time::timeout(
            call.timeout,
            self.page.evaluate(&call.source, call.args.clone()),
        )
        .await
        .map_err(|_| PortalError::Operation(format!("{name}: script timed out after {:?}", call.timeout)))??;
        Ok(Observation::Json(value))
    }
}

#[async_trait]
impl OperationTransport for BrowserOperationTransport {
    async fn execute(&self, candidate: &CandidateOperation) -> Result<Observation, PortalError> {
        match &candidate.call {
            OperationCall::Page(call) => self.run_page(&candidate.name, call).await,
            OperationCall::Script(call) => self.run_script(&candidate.name, call).await,
        }
    }
}
