use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total wire requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "rental_requests_total";

/// Histogram: wire request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "rental_request_duration_seconds";

/// Counter: reservations committed.
pub const RESERVATIONS_TOTAL: &str = "rental_reservations_total";

/// Counter: reservations refused. Labels: reason (error code).
pub const RESERVATIONS_REJECTED_TOTAL: &str = "rental_reservations_rejected_total";

/// Histogram: reserve latency in seconds, pricing included.
pub const RESERVE_DURATION_SECONDS: &str = "rental_reserve_duration_seconds";

/// Counter: bookings released from the calendar. Labels: reason (cancelled, expired).
pub const RELEASES_TOTAL: &str = "rental_releases_total";

/// Counter: collaborator calls that timed out or failed. Labels: collaborator.
pub const COLLABORATOR_FAILURES_TOTAL: &str = "rental_collaborator_failures_total";

/// Counter: calendar inserts undone after a failed journal append.
pub const ROLLBACKS_TOTAL: &str = "rental_rollbacks_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rental_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rental_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rental_connections_rejected_total";

/// Gauge: bookings currently awaiting payment.
pub const PENDING_BOOKINGS: &str = "rental_pending_bookings";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rental_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rental_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
