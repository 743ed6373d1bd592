//! Diagnostics the library records about itself into the `metrics` ping.

use rusqlite::Connection;

use crate::constants::METRICS_PING_NAME;
use crate::database::metrics;
use crate::protocol::{CommonMetricData, Metric};
use crate::Result;

fn internal(category: &str, name: &str, label: Option<&str>) -> CommonMetricData {
    CommonMetricData {
        dynamic_label: label.map(str::to_owned),
        ..CommonMetricData::new(category, name, METRICS_PING_NAME)
    }
}

/// Pings discarded at enqueue because their body was too large.
pub(crate) fn discarded_exceeding_pings_size() -> CommonMetricData {
    internal("beacon.upload", "discarded_exceeding_pings_size", None)
}

/// Queued pings evicted to respect the queue bounds.
pub(crate) fn pending_pings_evicted() -> CommonMetricData {
    internal("beacon.upload", "pending_pings_evicted", None)
}

/// Failed upload attempts, labeled `recoverable`, `unrecoverable` or
/// `max_retries`.
pub(crate) fn ping_upload_failure(label: &str) -> CommonMetricData {
    internal("beacon.upload", "ping_upload_failure", Some(label))
}

/// Records dropped because the pre-init buffer was full.
pub(crate) fn preinit_tasks_overflow() -> CommonMetricData {
    internal("beacon.error", "preinit_tasks_overflow", None)
}

/// Adds `amount` to a counter, saturating at `i32::MAX`.
pub(crate) fn add_to_counter(conn: &Connection, meta: &CommonMetricData, amount: i32) -> Result<()> {
    metrics::record_with(conn, meta, |old| match old {
        Some(Metric::Counter(current)) => Metric::Counter(current.saturating_add(amount)),
        _ => Metric::Counter(amount),
    })
}
