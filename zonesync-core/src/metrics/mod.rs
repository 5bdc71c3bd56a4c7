//! Metric names and recording helpers
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the embedding application installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

pub const DELTAS_SUBMITTED: &str = "zonesync_deltas_submitted_total";
pub const DELTAS_SENT: &str = "zonesync_deltas_sent_total";
pub const SERVER_DELTAS: &str = "zonesync_server_deltas_total";
pub const CONFLICTS: &str = "zonesync_conflicts_total";
pub const OUTBOUND_DROPPED: &str = "zonesync_outbound_dropped_total";
pub const PROTOCOL_ERRORS: &str = "zonesync_protocol_errors_total";
pub const RECONNECT_ATTEMPTS: &str = "zonesync_reconnect_attempts_total";
pub const PENDING_CHANGES: &str = "zonesync_pending_changes";
pub const OUTBOUND_QUEUED: &str = "zonesync_outbound_queued";
pub const LATENCY_MS: &str = "zonesync_latency_ms";
pub const RECONCILE_DURATION_MS: &str = "zonesync_reconcile_duration_ms";

/// Register descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(DELTAS_SUBMITTED, "Local zone deltas accepted");
    describe_counter!(DELTAS_SENT, "Zone delta envelopes written to the authority");
    describe_counter!(SERVER_DELTAS, "Authoritative zone deltas applied");
    describe_counter!(CONFLICTS, "Zone conflicts recorded");
    describe_counter!(OUTBOUND_DROPPED, "Queued messages dropped because the queue was full");
    describe_counter!(PROTOCOL_ERRORS, "Inbound frames that could not be decoded");
    describe_counter!(RECONNECT_ATTEMPTS, "Failed connection attempts");
    describe_gauge!(PENDING_CHANGES, "Local changes awaiting acknowledgment");
    describe_gauge!(OUTBOUND_QUEUED, "Messages waiting for a connection");
    describe_histogram!(LATENCY_MS, "Heartbeat round trip in milliseconds");
    describe_histogram!(RECONCILE_DURATION_MS, "Time to reconcile one authoritative delta in milliseconds");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Records elapsed milliseconds into a histogram when stopped
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}
