//! Browser layer for portal-bridge.
//!
//! A [`BrowserPage`] is one automated tab inside a dedicated Chromium profile. The
//! session layer only ever talks to this trait; [`ChromiumLauncher`] provides the
//! DevTools-backed implementation and the `mock` feature a scripted double.

pub mod config;
pub mod error;
pub mod launcher;
pub mod metrics;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod page;
pub mod scripts;
pub mod transport;
pub mod util;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portal_core_types::{Locator, PageSnapshot, SnapshotProbe, WaitPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use config::{detect_chrome_executable, CdpConfig};
pub use error::{AdapterError, AdapterErrorKind};
pub use launcher::ChromiumLauncher;
pub use page::CdpPage;
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

/// Where a located element sits and whether a user could see it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementState {
    pub visible: bool,
    pub x: f64,
    pub y: f64,
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn navigate(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> Result<(), AdapterError>;

    /// Invokes the function expression `function` with `args` and returns its
    /// JSON result. Promises are awaited.
    async fn evaluate(&self, function: &str, args: Value) -> Result<Value, AdapterError>;

    async fn query(&self, locator: &Locator) -> Result<Option<ElementState>, AdapterError>;

    /// Waits up to `timeout` for a visible match, then clicks its center.
    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<(), AdapterError>;

    async fn fill(
        &self,
        locator: &Locator,
        value: &str,
        timeout: Duration,
    ) -> Result<(), AdapterError>;

    async fn current_url(&self) -> Result<String, AdapterError>;

    async fn title(&self) -> Result<String, AdapterError>;

    async fn close(&self) -> Result<(), AdapterError>;

    fn is_alive(&self) -> bool {
        true
    }

    async fn is_visible(&self, locator: &Locator) -> Result<bool, AdapterError> {
        Ok(self
            .query(locator)
            .await?
            .map(|state| state.visible)
            .unwrap_or(false))
    }

    async fn snapshot(&self, probe: &SnapshotProbe) -> Result<PageSnapshot, AdapterError> {
        let url = self.current_url().await?;
        let title = self.title().await?;
        let args = serde_json::to_value(probe)
            .map_err(|err| AdapterError::script(format!("probe encoding failed: {err}")))?;
        let raw = self.evaluate(&scripts::SNAPSHOT_PROBE, args).await?;
        Ok(PageSnapshot::from_probe(url, title, &raw, probe))
    }
}

/// Profile and mode for one browser launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchRequest {
    pub profile_dir: PathBuf,
    pub headless: bool,
    /// Used in logs only.
    pub label: String,
}

#[async_trait]
pub trait PageLauncher: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn BrowserPage>, AdapterError>;
}
