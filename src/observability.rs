use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total wire requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "venuebook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "venuebook_request_duration_seconds";

/// Counter: availability checks. Labels: available.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "venuebook_availability_checks_total";

/// Counter: slot reservations. Labels: outcome (reserved, rejected, released).
pub const RESERVATIONS_TOTAL: &str = "venuebook_reservations_total";

/// Counter: conditional day writes that lost a race and were retried.
pub const RESERVATION_RETRIES_TOTAL: &str = "venuebook_reservation_retries_total";

/// Counter: booking creations. Labels: outcome (created, rejected).
pub const BOOKINGS_TOTAL: &str = "venuebook_bookings_total";

/// Counter: overlapping-booking conflicts recorded.
pub const CONFLICTS_DETECTED_TOTAL: &str = "venuebook_conflicts_detected_total";

/// Counter: store reads that failed and were treated as empty.
pub const STORE_READ_FAILURES_TOTAL: &str = "venuebook_store_read_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "venuebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "venuebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "venuebook_connections_rejected_total";

/// Counter: failed password handshakes.
pub const AUTH_FAILURES_TOTAL: &str = "venuebook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "venuebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "venuebook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None; a
/// failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

/// Short label for a request, used on metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Auth { .. } => "auth",
        Request::CreateResource { .. } => "create_resource",
        Request::GetResource { .. } => "get_resource",
        Request::CheckAvailability { .. } => "check_availability",
        Request::BookTimeSlot { .. } => "book_time_slot",
        Request::ReleaseTimeSlot { .. } => "release_time_slot",
        Request::CreateBooking { .. } => "create_booking",
        Request::GetBooking { .. } => "get_booking",
        Request::UpdateBookingStatus { .. } => "update_booking_status",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::AddBlockedTime { .. } => "add_blocked_time",
        Request::RemoveBlockedTime { .. } => "remove_blocked_time",
        Request::BlockedTimes { .. } => "blocked_times",
        Request::GetDays { .. } => "get_days",
        Request::CreateDay { .. } => "create_day",
        Request::UpdateDay { .. } => "update_day",
        Request::FreeSlots { .. } => "free_slots",
        Request::DetectConflicts { .. } => "detect_conflicts",
        Request::ResolveConflict { .. } => "resolve_conflict",
        Request::ReconcileDay { .. } => "reconcile_day",
    }
}
