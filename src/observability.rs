use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::payment::PaymentOutcome;

// ── Booking funnel ──────────────────────────────────────────────

/// Counter: bookings persisted after a successful payment.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "staydesk_bookings_confirmed_total";

/// Counter: stays rejected by the availability check. Labels: reason.
pub const AVAILABILITY_REJECTIONS_TOTAL: &str = "staydesk_availability_rejections_total";

/// Counter: checkout widget results. Labels: outcome.
pub const PAYMENT_OUTCOMES_TOTAL: &str = "staydesk_payment_outcomes_total";

/// Counter: order-creation attempts, retries included.
pub const ORDER_ATTEMPTS_TOTAL: &str = "staydesk_order_attempts_total";

/// Histogram: order creation latency in seconds, across all attempts.
pub const ORDER_CREATE_DURATION_SECONDS: &str = "staydesk_order_create_duration_seconds";

/// Counter: payments taken whose booking could not be saved.
pub const BOOKING_PERSIST_FAILURES_TOTAL: &str = "staydesk_booking_persist_failures_total";

/// Counter: confirmation emails that failed to send.
pub const EMAIL_FAILURES_TOTAL: &str = "staydesk_email_failures_total";

// ── Background work ─────────────────────────────────────────────

/// Counter: maintenance flag polls. Labels: status.
pub const MAINTENANCE_POLLS_TOTAL: &str = "staydesk_maintenance_polls_total";

/// Counter: bookings moved to completed by the sweeper.
pub const STAYS_COMPLETED_TOTAL: &str = "staydesk_stays_completed_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staydesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staydesk_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a payment outcome.
pub fn payment_outcome_label(outcome: &PaymentOutcome) -> &'static str {
    match outcome {
        PaymentOutcome::Succeeded(_) => "succeeded",
        PaymentOutcome::Dismissed => "dismissed",
        PaymentOutcome::Failed { .. } => "failed",
    }
}
