use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::page::CdpPage;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget};
use crate::{BrowserPage, LaunchRequest, PageLauncher};

/// Launches one Chromium per request, rooted at the requested profile directory.
#[derive(Clone, Debug)]
pub struct ChromiumLauncher {
    base: CdpConfig,
}

impl ChromiumLauncher {
    pub fn new(base: CdpConfig) -> Self {
        Self { base }
    }

    fn config_for(&self, request: &LaunchRequest) -> CdpConfig {
        let mut cfg = self.base.clone();
        cfg.user_data_dir = request.profile_dir.clone();
        cfg.headless = request.headless;
        cfg
    }
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new(CdpConfig::default())
    }
}

fn required_str(value: &Value, key: &str, method: &str) -> Result<String, AdapterError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{method} response missing {key}"))
        })
}

#[async_trait]
impl PageLauncher for ChromiumLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Arc<dyn BrowserPage>, AdapterError> {
        let cfg = self.config_for(&request);
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::launch(cfg).await?);

        let created = transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = required_str(&created, "targetId", "Target.createTarget")?;

        let attached = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = required_str(&attached, "sessionId", "Target.attachToTarget")?;

        let page: Arc<dyn BrowserPage> =
            Arc::new(CdpPage::attach(transport, target_id, session_id).await?);
        info!(
            target: "cdp-launcher",
            label = %request.label,
            headless = request.headless,
            profile = %request.profile_dir.display(),
            "browser page ready"
        );
        Ok(page)
    }
}
