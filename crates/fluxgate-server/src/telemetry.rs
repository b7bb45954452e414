//! Tracing and metrics initialization.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber. `RUST_LOG` wins over the configured
/// level; repeated calls are harmless (tests).
pub fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let result = if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}

/// Build the Prometheus recorder, register metric descriptions, and return
/// the render handle.
///
/// The recorder installs once per process; later calls (tests running
/// several gateways in one process) get the same handle back.
pub fn init_metrics() -> PrometheusHandle {
    static HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();
    let handle = HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::debug!("metrics recorder already installed");
            }
            handle
        })
        .clone();

    describe_counter!("events_total", "Events accepted into the pipeline");
    describe_counter!("forwarded_total", "Events delivered to sinks");
    describe_counter!("failed_total", "Deliveries that failed permanently");
    describe_counter!("dropped_total", "Events dropped before delivery");
    describe_counter!("retried_total", "Delivery retry attempts");
    describe_histogram!(
        "forwarding_duration_seconds",
        "Sink delivery latency in seconds"
    );
    describe_gauge!("active_streams", "Connected stream subscribers");
    describe_gauge!(
        "federation_active_servers",
        "Federated servers currently healthy"
    );

    handle
}
