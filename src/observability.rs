use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: requests handled. Labels: action, status.
pub const REQUESTS_TOTAL: &str = "slotbook_requests_total";

/// Histogram: request latency in seconds. Labels: action.
pub const REQUEST_DURATION_SECONDS: &str = "slotbook_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (confirmed, queued, rejected, contention).
pub const BOOKINGS_TOTAL: &str = "slotbook_bookings_total";

/// Counter: bookings that passed every check but found the slot full.
pub const BOOKING_CONTENTION_TOTAL: &str = "slotbook_booking_contention_total";

/// Counter: queued reservations promoted into freed capacity.
pub const WAITLIST_PROMOTIONS_TOTAL: &str = "slotbook_waitlist_promotions_total";

/// Counter: failed logins.
pub const LOGIN_FAILURES_TOTAL: &str = "slotbook_login_failures_total";

/// Counter: maintenance runs. Labels: status (ok, error, busy).
pub const MAINTENANCE_RUNS_TOTAL: &str = "slotbook_maintenance_runs_total";

/// Histogram: maintenance run duration in seconds.
pub const MAINTENANCE_DURATION_SECONDS: &str = "slotbook_maintenance_duration_seconds";

pub const NO_SHOWS_TOTAL: &str = "slotbook_no_shows_total";

pub const CREDITS_RESTORED_TOTAL: &str = "slotbook_credits_restored_total";

/// Counter: maintenance records rolled back individually.
pub const MAINTENANCE_SKIPPED_TOTAL: &str = "slotbook_maintenance_skipped_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a request to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Register { .. } => "register",
        Request::Login { .. } => "login",
        Request::DeleteAccount { .. } => "delete_account",
        Request::ListVenues => "list_venues",
        Request::ListSlots { .. } => "list_slots",
        Request::Book { .. } => "book",
        Request::Cancel { .. } => "cancel",
        Request::CheckIn { .. } => "check_in",
        Request::MyReservations { .. } => "my_reservations",
        Request::AddSchedule { .. } => "add_schedule",
        Request::RemoveSchedule { .. } => "remove_schedule",
        Request::ListSchedules { .. } => "list_schedules",
        Request::AddAnnouncement { .. } => "add_announcement",
        Request::AddPost { .. } => "add_post",
        Request::ListAnnouncements => "list_announcements",
        Request::DeleteAnnouncement { .. } => "delete_announcement",
        Request::AddVenue { .. } => "add_venue",
        Request::UpdateVenue { .. } => "update_venue",
        Request::DeleteVenue { .. } => "delete_venue",
        Request::ListCourts { .. } => "list_courts",
        Request::AddCourt { .. } => "add_court",
        Request::DeleteCourt { .. } => "delete_court",
        Request::ListUsers => "list_users",
        Request::UpdateUser { .. } => "update_user",
        Request::DeleteUser { .. } => "delete_user",
        Request::ListReservations => "list_reservations",
        Request::AdminCancel { .. } => "admin_cancel",
        Request::SetSlotHot { .. } => "set_slot_hot",
        Request::RunMaintenance => "run_maintenance",
    }
}
