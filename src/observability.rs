use std::net::SocketAddr;

use crate::gateway::GatewayError;

// ── RED metrics (work-driven) ───────────────────────────────────

/// Counter: reconciliation ticks executed.
pub const TICKS_TOTAL: &str = "helmsman_ticks_total";

/// Counter: records whose state changed during a tick.
pub const RECORDS_CHANGED_TOTAL: &str = "helmsman_records_changed_total";

/// Histogram: one record's reconciliation latency in seconds, including all
/// remote round trips.
pub const TASK_DURATION_SECONDS: &str = "helmsman_task_duration_seconds";

/// Counter: gateway failures. Labels: kind.
pub const GATEWAY_ERRORS_TOTAL: &str = "helmsman_gateway_errors_total";

// ── USE metrics (resource-driven) ───────────────────────────────

/// Histogram: durable store write duration in seconds.
pub const STORE_SAVE_DURATION_SECONDS: &str = "helmsman_store_save_duration_seconds";

/// Counter: combined notification messages delivered.
pub const NOTIFICATIONS_TOTAL: &str = "helmsman_notifications_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a gateway error to a short label for metrics.
pub fn error_label(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::Network(_) => "network",
        GatewayError::Auth(_) => "auth",
        GatewayError::Conflict { .. } => "conflict",
        GatewayError::Validation(_) => "validation",
        GatewayError::Structural(_) => "structural",
        GatewayError::Unimplemented(_) => "unimplemented",
    }
}
