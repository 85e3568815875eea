use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;

lazy_static! {
    pub static ref ROUTE_DECODE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "route_decode_failures",
            "Route payloads that failed to decode, by entry id"
        ),
        &["id"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_REARMED: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_rearmed", "One-shot watches re-armed, by watch kind"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref SESSION_RECONNECTS: IntCounter = IntCounter::new(
        "session_reconnects",
        "Coordination-store sessions recreated after loss"
    )
    .expect("metric can not be created");

    pub static ref CACHE_FULL_REFRESHES: IntCounter = IntCounter::new(
        "cache_full_refreshes",
        "Full cache rebuilds (initial sync and post-reconnect resync)"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(ROUTE_DECODE_FAILURES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(WATCH_REARMED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(SESSION_RECONNECTS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CACHE_FULL_REFRESHES.clone()))
            .expect("collector can be registered");
    });
}

/// Export metrics for Prometheus to scrape
pub fn get_metrics_body() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        eprintln!("could not encode custom metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
