use once_cell::sync::OnceCell;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

static LOGGING: OnceCell<bool> = OnceCell::new();

/// Installs the global subscriber once. `RUST_LOG` wins over the configured
/// level. Output goes to stderr so stdout stays free for tool responses.
///
/// Returns whether this process has a subscriber installed by us; later calls
/// are no-ops.
pub fn init_logging(config: &LoggingConfig) -> bool {
    *LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        let installed = if config.json {
            registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
        };
        installed.is_ok()
    })
}

/// Registry with the browser command metrics attached.
pub fn metrics_registry() -> Registry {
    let registry = Registry::new();
    cdp_adapter::metrics::register_metrics(&registry);
    registry
}

/// Prometheus text exposition of `registry`.
pub fn render_metrics(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        tracing::warn!(%err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
