//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade and is a no-op until the
//! host installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const PRESENCE_EVENTS_TOTAL: &str = "murmur_presence_events_total";
    pub const SNAPSHOT_FAILURES_TOTAL: &str = "murmur_snapshot_failures_total";
    pub const SIGNALS_SENT_TOTAL: &str = "murmur_signals_sent_total";
    pub const SIGNAL_FAILURES_TOTAL: &str = "murmur_signal_failures_total";
    pub const TYPING_EXPIRED_TOTAL: &str = "murmur_typing_expired_total";
    pub const TYPING_ACTIVE: &str = "murmur_typing_active";
}

/// Describe all metrics. Call once after installing a recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::PRESENCE_EVENTS_TOTAL,
        "Presence delta events folded into occupancy"
    );
    metrics::describe_counter!(
        names::SNAPSHOT_FAILURES_TOTAL,
        "Here-now snapshot queries that failed"
    );
    metrics::describe_counter!(names::SIGNALS_SENT_TOTAL, "Typing signals sent");
    metrics::describe_counter!(
        names::SIGNAL_FAILURES_TOTAL,
        "Typing signals the transport rejected"
    );
    metrics::describe_counter!(
        names::TYPING_EXPIRED_TOTAL,
        "Typing entries removed by the timeout sweep"
    );
    metrics::describe_gauge!(names::TYPING_ACTIVE, "Users currently typing");
}

/// Record a folded presence event.
pub fn record_presence_event(action: &'static str) {
    counter!(names::PRESENCE_EVENTS_TOTAL, "action" => action).increment(1);
}

/// Record a failed snapshot query.
pub fn record_snapshot_failure() {
    counter!(names::SNAPSHOT_FAILURES_TOTAL).increment(1);
}

/// Record a sent typing signal.
pub fn record_signal_sent(kind: &'static str) {
    counter!(names::SIGNALS_SENT_TOTAL, "kind" => kind).increment(1);
}

/// Record a failed typing signal.
pub fn record_signal_failure() {
    counter!(names::SIGNAL_FAILURES_TOTAL).increment(1);
}

/// Record typing entries removed by a sweep.
pub fn record_typing_expired(count: usize) {
    counter!(names::TYPING_EXPIRED_TOTAL).increment(count as u64);
}

/// Update the number of users currently typing.
pub fn set_typing_active(count: usize) {
    gauge!(names::TYPING_ACTIVE).set(count as f64);
}
