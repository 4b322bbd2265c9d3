
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;

lazy_static! {
    pub static ref WRITE_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("kvsync_write_total", "Conflict-safe write calls by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref WRITE_CONFLICTS: IntCounterVec = IntCounterVec::new(
        Opts::new("kvsync_write_conflicts_total", "Conflicting create/update attempts"),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref SYNC_EVENTS_DELIVERED: IntCounter = IntCounter::new(
        "kvsync_sync_events_delivered_total",
        "Update events handed to sync callbacks"
    )
    .expect("metric can not be created");

    pub static ref SYNC_EVENTS_SKIPPED: IntCounter = IntCounter::new(
        "kvsync_sync_events_skipped_total",
        "Delete or valueless events skipped by sync loops"
    )
    .expect("metric can not be created");

    pub static ref SYNC_DECODE_FAILURES: IntCounter = IntCounter::new(
        "kvsync_sync_decode_failures_total",
        "Typed sync payloads dropped because they did not decode"
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "kvsync_active_subscriptions",
        "Running sync delivery loops"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

fn register_custom_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(WRITE_OUTCOMES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(WRITE_CONFLICTS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(SYNC_EVENTS_DELIVERED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(SYNC_EVENTS_SKIPPED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(SYNC_DECODE_FAILURES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(ACTIVE_SUBSCRIPTIONS.clone()))
            .expect("collector can be registered");
    });
}

/// Renders every kvsync metric in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    register_custom_metrics();

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
