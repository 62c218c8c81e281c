use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CdpMetricsSnapshot {
    pub commands: u64,
    pub command_failures: u64,
    pub events: u64,
    pub navigations: u64,
    pub navigation_timeouts: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static NAVIGATIONS: AtomicU64 = AtomicU64::new(0);
static NAVIGATION_TIMEOUTS: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref COMMANDS_TOTAL: Option<IntCounterVec> = IntCounterVec::new(
        Opts::new("portal_cdp_commands_total", "DevTools commands sent"),
        &["method"]
    )
    .ok();
    static ref COMMAND_FAILURES_TOTAL: Option<IntCounterVec> = IntCounterVec::new(
        Opts::new("portal_cdp_command_failures_total", "DevTools commands that failed"),
        &["method"]
    )
    .ok();
    static ref COMMAND_DURATION: Option<HistogramVec> = HistogramVec::new(
        histogram_opts!(
            "portal_cdp_command_duration_seconds",
            "DevTools command latency",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 15.0]
        ),
        &["method"]
    )
    .ok();
    static ref EVENTS_TOTAL: Option<IntCounter> =
        IntCounter::new("portal_cdp_events_total", "DevTools events received").ok();
    static ref NAVIGATIONS_TOTAL: Option<IntCounterVec> = IntCounterVec::new(
        Opts::new("portal_cdp_navigations_total", "Page navigations by outcome"),
        &["outcome"]
    )
    .ok();
}

fn register<C>(registry: &Registry, collector: Option<&C>)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    let Some(collector) = collector else {
        return;
    };
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, COMMANDS_TOTAL.as_ref());
    register(registry, COMMAND_FAILURES_TOTAL.as_ref());
    register(registry, COMMAND_DURATION.as_ref());
    register(registry, EVENTS_TOTAL.as_ref());
    register(registry, NAVIGATIONS_TOTAL.as_ref());
}

pub fn record_command(method: &str) {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    if let Some(counter) = COMMANDS_TOTAL.as_ref() {
        counter.with_label_values(&[method]).inc();
    }
}

pub fn record_command_success(method: &str, duration: Duration) {
    if let Some(histogram) = COMMAND_DURATION.as_ref() {
        histogram
            .with_label_values(&[method])
            .observe(duration.as_secs_f64());
    }
}

pub fn record_command_failure(method: &str) {
    COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
    if let Some(counter) = COMMAND_FAILURES_TOTAL.as_ref() {
        counter.with_label_values(&[method]).inc();
    }
}

pub fn record_event() {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    if let Some(counter) = EVENTS_TOTAL.as_ref() {
        counter.inc();
    }
}

pub fn record_navigation(timed_out: bool) {
    NAVIGATIONS.fetch_add(1, Ordering::Relaxed);
    let outcome = if timed_out {
        NAVIGATION_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
        "timeout"
    } else {
        "ok"
    };
    if let Some(counter) = NAVIGATIONS_TOTAL.as_ref() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn snapshot() -> CdpMetricsSnapshot {
    CdpMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        navigations: NAVIGATIONS.load(Ordering::Relaxed),
        navigation_timeouts: NAVIGATION_TIMEOUTS.load(Ordering::Relaxed),
    }
}
