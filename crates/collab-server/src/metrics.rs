//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names.

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Live WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Inbound events (counter, labels: type).
pub const HUB_EVENTS_TOTAL: &str = "hub_events_total";
/// Errors reported to clients (counter, labels: type, code).
pub const HUB_ERRORS_TOTAL: &str = "hub_errors_total";
/// Handler duration (histogram, labels: type).
pub const HUB_EVENT_DURATION_SECONDS: &str = "hub_event_duration_seconds";
/// Messages dropped on full mailboxes during fan-out (counter).
pub const HUB_BROADCAST_DROPS_TOTAL: &str = "hub_broadcast_drops_total";
/// Rooms with at least one member (gauge).
pub const HUB_ROOMS_ACTIVE: &str = "hub_rooms_active";
/// Integration events delivered by a sink (counter).
pub const PUBLISHER_EVENTS_DELIVERED_TOTAL: &str = "publisher_events_delivered_total";
/// Integration events a sink failed to deliver (counter).
pub const PUBLISHER_EVENTS_FAILED_TOTAL: &str = "publisher_events_failed_total";
/// Integration events dropped on a full queue (counter).
pub const PUBLISHER_EVENTS_DROPPED_TOTAL: &str = "publisher_events_dropped_total";
/// Connections closed by the idle sweep (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "heartbeat_timeouts_total";
