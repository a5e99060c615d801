use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking and room operations. Labels: op, status.
pub const BOOKINGS_TOTAL: &str = "roombook_bookings_total";

// ── Reminder scheduler ──────────────────────────────────────────

/// Counter: scheduler ticks. Labels: status (ok, storage_error, timeout).
pub const REMINDER_TICKS_TOTAL: &str = "roombook_reminder_ticks_total";

/// Counter: per-booking reminder outcomes. Labels: status.
pub const REMINDERS_TOTAL: &str = "roombook_reminders_total";

/// Histogram: wall time of one tick in seconds.
pub const REMINDER_TICK_DURATION_SECONDS: &str = "roombook_reminder_tick_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

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
