use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rentd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rentd_query_duration_seconds";

// ── Reservation outcomes ────────────────────────────────────────

/// Counter: reservations committed (one per order line).
pub const RESERVATIONS_CREATED_TOTAL: &str = "rentd_reservations_created_total";

/// Counter: commits refused because stock ran out.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "rentd_reservation_conflicts_total";

/// Counter: reservations moved to cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "rentd_reservations_cancelled_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rentd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rentd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rentd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentd_wal_flush_batch_size";

/// Counter: background compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "rentd_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on port {port}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProduct { .. } => "insert_product",
        Command::InsertVariant { .. } => "insert_variant",
        Command::SetStock { .. } => "set_stock",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::InsertOrder { .. } => "insert_order",
        Command::CancelOrder { .. } => "cancel_order",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectOrderReservations { .. } => "select_order_reservations",
        Command::SelectPoolReservations { .. } => "select_pool_reservations",
        Command::SelectProducts => "select_products",
    }
}
