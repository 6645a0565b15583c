//! Prometheus metrics.
//!
//! Installs the global recorder and keeps the render handle for the
//! `/metrics` route. Individual metrics are emitted at their call sites
//! with the `metrics` macros.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Handle for rendering the Prometheus exposition format.
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the global metrics recorder. Call once at startup, before
/// anything emits a metric.
pub fn init_metrics() -> anyhow::Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(MetricsHandle { handle })
}

fn describe_metrics() {
    describe_counter!(
        "offertory_errors_total",
        "Errors by code and category"
    );
    describe_counter!(
        "offertory_incidents_opened_total",
        "Incidents opened, by dependency and severity"
    );
    describe_counter!(
        "offertory_incidents_resolved_total",
        "Incidents resolved, by dependency"
    );
    describe_counter!(
        "offertory_incident_store_failovers_total",
        "Times the incident ledger switched to its file-backed store"
    );
    describe_counter!(
        "offertory_recovery_attempts_total",
        "Recovery attempts, by dependency and outcome"
    );
    describe_gauge!(
        "offertory_dependency_healthy",
        "1 when the dependency's latest probe was healthy, else 0"
    );
    describe_gauge!(
        "offertory_watchdog_failures",
        "Consecutive store ping failures observed by the watchdog"
    );
    describe_counter!(
        "offertory_watchdog_degraded_total",
        "Times the watchdog entered the degraded phase"
    );
    describe_counter!(
        "offertory_watchdog_reconnects_total",
        "Store reconnect attempts made by the watchdog"
    );
}
