//! Business metrics for visit admission.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `admission_slots_total{outcome}` - Slot requests by outcome (granted, full, closed, ineligible, ...)
//! - `admission_redemptions_total{outcome}` - Redemption attempts by outcome
//! - `admission_queue_transitions_total{status}` - Queue entries entering each status
//!
//! ## Gauges
//! - `admission_queue_waiting` - Entries currently waiting
//!
//! ## Histograms
//! - `admission_queue_wait_seconds` - Time from check-in to being called

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all admission metric descriptions.
///
/// Call once at startup, after installing a recorder.
pub fn register_admission_metrics() {
    describe_counter!(
        "admission_slots_total",
        "Slot requests by outcome (granted, full, closed, ineligible, duplicate)"
    );
    describe_counter!(
        "admission_redemptions_total",
        "Ticket redemptions by outcome (redeemed, not_found, already_used, wrong_day, tampered)"
    );
    describe_counter!(
        "admission_queue_transitions_total",
        "Queue entries entering each status"
    );
    describe_gauge!("admission_queue_waiting", "Queue entries currently waiting");
    describe_histogram!(
        "admission_queue_wait_seconds",
        "Time from check-in to being called"
    );

    tracing::info!("Admission metrics registered");
}

/// Record the outcome of a slot request.
pub fn record_slot_outcome(outcome: &'static str) {
    metrics::counter!("admission_slots_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded slot outcome metric");
}

/// Record the outcome of a redemption attempt.
pub fn record_redemption(outcome: &'static str) {
    metrics::counter!("admission_redemptions_total", "outcome" => outcome).increment(1);
}

/// Record a queue entry entering `status`.
pub fn record_queue_transition(status: &'static str) {
    metrics::counter!("admission_queue_transitions_total", "status" => status).increment(1);
}

/// Record how long a visitor waited before being called.
pub fn record_queue_wait(seconds: f64) {
    metrics::histogram!("admission_queue_wait_seconds").record(seconds);
}

/// Update the number of waiting entries.
#[allow(clippy::cast_precision_loss)] // queue sizes are far below 2^52
pub fn update_queue_waiting(waiting: usize) {
    metrics::gauge!("admission_queue_waiting").set(waiting as f64);
}
