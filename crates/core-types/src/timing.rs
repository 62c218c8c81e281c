//! Bounded polling and the single transparent retry for navigation timeouts.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::PortalError;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Calls `probe` until it yields `Some`, sleeping `interval` between calls.
///
/// The probe runs once immediately and once more at the deadline; `None` means the
/// timeout elapsed. A timeout too large to represent as an instant never expires.
pub async fn poll_until_some<T, F, Fut>(interval: Duration, timeout: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let interval = interval.max(MIN_INTERVAL);
    let deadline = Instant::now().checked_add(timeout);

    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }

        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                sleep(interval.min(deadline - now)).await;
            }
            None => sleep(interval).await,
        }
    }
}

/// Boolean form of [`poll_until_some`].
pub async fn poll_until<F, Fut>(interval: Duration, timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until_some(interval, timeout, || {
        let check = predicate();
        async move { check.await.then_some(()) }
    })
    .await
    .is_some()
}

/// Runs `op`, repeating it once if it failed with a navigation timeout.
pub async fn retry_once_on_timeout<T, F, Fut>(label: &str, mut op: F) -> Result<T, PortalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PortalError>>,
{
    match op().await {
        Err(PortalError::NavigationTimeout(detail)) => {
            warn!(target: "portal-timing", %label, %detail, "navigation timed out; retrying once");
            op().await
        }
        other => other,
    }
}
