//! Prometheus metrics recorder and metric names.

use ::metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Connections admitted (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections removed, including drains (counter).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Currently registered clients (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Submissions received (counter, labels: outcome = broadcast | ignored | rejected).
pub const SUBMISSIONS_TOTAL: &str = "relay_submissions_total";
/// Frames queued for a recipient (counter).
pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
/// Failed writes that removed a recipient (counter, labels: reason).
pub const DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
/// Heartbeats queued (counter).
pub const HEARTBEATS_TOTAL: &str = "relay_heartbeats_total";

/// Install the Prometheus recorder globally.
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Register help text for every relay metric with the current recorder.
pub fn describe_metrics() {
    describe_counter!(CONNECTIONS_TOTAL, "Connections admitted");
    describe_counter!(DISCONNECTIONS_TOTAL, "Connections removed");
    describe_gauge!(CONNECTIONS_ACTIVE, "Currently registered clients");
    describe_counter!(SUBMISSIONS_TOTAL, "Submissions received, by outcome");
    describe_counter!(DELIVERIES_TOTAL, "Frames queued for a recipient");
    describe_counter!(
        DELIVERY_FAILURES_TOTAL,
        "Failed writes that removed a recipient, by reason"
    );
    describe_counter!(HEARTBEATS_TOTAL, "Heartbeats queued");
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}
