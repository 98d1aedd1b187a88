// Metrics for lock operations
// Emitted through the `metrics` facade; installing an exporter is up to the embedding application

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::handle::StrategyKind;

pub const ACQUIRE_TOTAL: &str = "fencelock_acquire_total";
pub const ACQUIRE_DURATION: &str = "fencelock_acquire_duration_seconds";
pub const RELEASE_TOTAL: &str = "fencelock_release_total";
pub const BACKEND_ERRORS_TOTAL: &str = "fencelock_backend_errors_total";
pub const FENCING_UNAVAILABLE_TOTAL: &str = "fencelock_fencing_unavailable_total";

/// Acquisition outcome label values
pub const OUTCOME_HELD: &str = "held";
pub const OUTCOME_NOT_ACQUIRED: &str = "not_acquired";
pub const OUTCOME_ERROR: &str = "error";

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_counter!(
        ACQUIRE_TOTAL,
        "Total number of lock acquisitions by strategy and outcome"
    );
    describe_histogram!(
        ACQUIRE_DURATION,
        "Lock acquisition latency in seconds, across all attempts"
    );
    describe_counter!(
        RELEASE_TOTAL,
        "Total number of lock releases by strategy and whether a key was removed"
    );
    describe_counter!(
        BACKEND_ERRORS_TOTAL,
        "Total number of failed or timed-out backend calls"
    );
    describe_counter!(
        FENCING_UNAVAILABLE_TOTAL,
        "Acquisitions that could not obtain a fencing token"
    );
}

pub fn record_acquire(strategy: StrategyKind, outcome: &'static str, elapsed: Duration) {
    counter!(ACQUIRE_TOTAL, "strategy" => strategy.as_str(), "outcome" => outcome).increment(1);
    histogram!(ACQUIRE_DURATION, "strategy" => strategy.as_str()).record(elapsed.as_secs_f64());
}

pub fn record_release(strategy: StrategyKind, released: bool) {
    let released = if released { "true" } else { "false" };
    counter!(RELEASE_TOTAL, "strategy" => strategy.as_str(), "released" => released).increment(1);
}

pub fn record_backend_error(backend: &str, op: &'static str) {
    counter!(BACKEND_ERRORS_TOTAL, "backend" => backend.to_string(), "op" => op).increment(1);
}

pub fn record_fencing_unavailable() {
    counter!(FENCING_UNAVAILABLE_TOTAL).increment(1);
}
