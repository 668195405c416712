use apns_gateway::Purpose;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

fn register_counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("failed to create {name}: {e}"));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    counter
}

static SEND_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "ios_push_send_attempts_total",
        "APNs send attempts, including retries",
        &["purpose"],
    )
});

static DISPATCH_OUTCOMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "ios_push_dispatch_outcomes_total",
        "Final state of each push call",
        &["purpose", "outcome"],
    )
});

static CONNECTIONS_BUILT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "ios_push_connections_built_total",
        "APNs sessions opened after a cache miss",
        &["purpose"],
    )
});

static CONNECTIONS_EVICTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "ios_push_connections_evicted_total",
        "Cached APNs sessions dropped",
        &["purpose", "cause"],
    )
});

static ROTATION_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter(
        "ios_push_rotation_events_total",
        "Certificate rotation messages received",
        &["result"],
    )
});

pub fn record_send_attempt(purpose: Purpose) {
    SEND_ATTEMPTS_TOTAL
        .with_label_values(&[purpose.as_str()])
        .inc();
}

pub fn record_outcome(purpose: Purpose, outcome: &str) {
    DISPATCH_OUTCOMES_TOTAL
        .with_label_values(&[purpose.as_str(), outcome])
        .inc();
}

pub fn record_connection_built(purpose: Purpose) {
    CONNECTIONS_BUILT_TOTAL
        .with_label_values(&[purpose.as_str()])
        .inc();
}

pub fn record_eviction(purpose: Purpose, cause: &str) {
    CONNECTIONS_EVICTED_TOTAL
        .with_label_values(&[purpose.as_str(), cause])
        .inc();
}

pub fn record_rotation(result: &str) {
    ROTATION_EVENTS_TOTAL.with_label_values(&[result]).inc();
}

/// Render the default registry in the Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
