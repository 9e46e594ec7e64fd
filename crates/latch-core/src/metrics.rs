// Lock metrics
// Counter names recorded by the acquisition loop and by handle release.
//
// Counters go through the `metrics` facade. This crate installs no recorder;
// an embedding application installs one (e.g. a Prometheus exporter) and
// then calls `describe_metrics`. Without a recorder the counters are no-ops.

use ::metrics::describe_counter;

pub const LOCK_ATTEMPTS_TOTAL: &str = "latch_lock_attempts_total";
pub const LOCK_ACQUIRED_TOTAL: &str = "latch_lock_acquired_total";
pub const LOCK_RELEASED_TOTAL: &str = "latch_lock_released_total";

/// Register metric descriptions with the installed recorder.
/// Call once at startup, after a recorder is installed.
pub fn describe_metrics() {
    describe_counter!(
        LOCK_ATTEMPTS_TOTAL,
        "Acquisition rounds run, labelled by round status"
    );
    describe_counter!(LOCK_ACQUIRED_TOTAL, "Locks successfully acquired");
    describe_counter!(LOCK_RELEASED_TOTAL, "Lock handles released");
}
