use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "creneau_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "creneau_query_duration_seconds";

/// Counter: booking commits that lost the slot race.
pub const BOOKING_CONFLICTS_TOTAL: &str = "creneau_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "creneau_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "creneau_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "creneau_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "creneau_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "creneau_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "creneau_wal_flush_batch_size";

// ── Notifications ───────────────────────────────────────────────

/// Counter: notifications handed to the mailer successfully.
pub const NOTIFICATIONS_SENT_TOTAL: &str = "creneau_notifications_sent_total";

/// Counter: notification sends that failed (advisory — logged only).
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "creneau_notifications_failed_total";

/// Counter: next-day reminders dispatched by the cron loop.
pub const REMINDERS_SENT_TOTAL: &str = "creneau_reminders_sent_total";

/// Install the Prometheus exporter on the given port. No-op if `port` is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBusiness { .. } => "insert_business",
        Command::UpdateBusiness { .. } => "update_business",
        Command::DeleteBusiness { .. } => "delete_business",
        Command::InsertHours { .. } => "insert_hours",
        Command::DeleteHours { .. } => "delete_hours",
        Command::InsertService { .. } => "insert_service",
        Command::DeleteService { .. } => "delete_service",
        Command::InsertAddOn { .. } => "insert_option",
        Command::DeleteAddOn { .. } => "delete_option",
        Command::InsertQuestion { .. } => "insert_question",
        Command::DeleteQuestion { .. } => "delete_question",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBusinesses => "select_businesses",
        Command::SelectServices { .. } => "select_services",
        Command::SelectBookings { .. } => "select_bookings",
    }
}
