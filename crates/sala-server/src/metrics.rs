//! Metrics collection and export for Sala.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use sala_core::ServiceStats;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "sala_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "sala_connections_active";
    pub const EVENTS_TOTAL: &str = "sala_events_total";
    pub const ROOMS_ACTIVE: &str = "sala_rooms_active";
    pub const MEMBERS_ACTIVE: &str = "sala_members_active";
    pub const PENDING_RECONNECTS: &str = "sala_pending_reconnects";
    pub const ERRORS_TOTAL: &str = "sala_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of client events processed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of open rooms");
    metrics::describe_gauge!(names::MEMBERS_ACTIVE, "Current number of live room members");
    metrics::describe_gauge!(
        names::PENDING_RECONNECTS,
        "Current number of outstanding reconnection records"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed client event.
pub fn record_event(kind: &str) {
    counter!(names::EVENTS_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Publish coordinator gauges.
pub fn set_service_stats(stats: &ServiceStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    gauge!(names::MEMBERS_ACTIVE).set(stats.member_count as f64);
    gauge!(names::PENDING_RECONNECTS).set(stats.pending_reconnects as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
