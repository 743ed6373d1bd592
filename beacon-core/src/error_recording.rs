//! Recording of metric usage errors.
//!
//! Errors are never handed to the caller. Each one increments the labeled
//! counter `beacon.error.<error type>`, labeled with the identifier of the
//! offending metric, in the metric's own pings and in the `metrics` ping.

use std::fmt::Display;

use rusqlite::Connection;

use crate::constants::METRICS_PING_NAME;
use crate::database::metrics;
use crate::internal_metrics::add_to_counter;
use crate::protocol::{CommonMetricData, ErrorType, Lifetime, Metric};
use crate::{beacon_debug, beacon_warn, Beacon, Result};

fn error_metric(error: ErrorType, label: &str, send_in_pings: &[String]) -> CommonMetricData {
    let mut pings = send_in_pings.to_vec();
    if !pings.iter().any(|ping| ping == METRICS_PING_NAME) {
        pings.push(METRICS_PING_NAME.to_owned());
    }
    CommonMetricData {
        name: error.as_str().to_owned(),
        category: "beacon.error".to_owned(),
        send_in_pings: pings,
        lifetime: Lifetime::Ping,
        disabled: false,
        dynamic_label: Some(label.to_owned()),
    }
}

/// Records an error against the metric described by `meta`.
///
/// Nothing is recorded while upload is disabled.
pub(crate) fn record_error<M: Display>(
    beacon: &Beacon,
    meta: &CommonMetricData,
    error: ErrorType,
    message: M,
    num_errors: impl Into<Option<i32>>,
) {
    let identifier = meta.base_identifier();
    beacon_debug!("[Error] {} for {}: {}", error, identifier, message);
    if !beacon.is_upload_enabled() {
        return;
    }
    let count = num_errors.into().unwrap_or(1);
    let result = beacon.with_database(|db| {
        db.write(|tx| record_error_in(tx, &identifier, &meta.send_in_pings, error, count))
    });
    if let Err(err) = result {
        beacon_warn!("[Error] failed to record {} for {}: {}", error, identifier, err);
    }
}

/// Records an error inside an open transaction.
pub(crate) fn record_error_in(
    conn: &Connection,
    identifier: &str,
    send_in_pings: &[String],
    error: ErrorType,
    count: i32,
) -> Result<()> {
    add_to_counter(conn, &error_metric(error, identifier, send_in_pings), count)
}

/// The number of errors of a type recorded for a metric.
///
/// `ping_name` defaults to the first ping the metric is sent in.
pub fn test_get_num_recorded_errors(
    beacon: &Beacon,
    meta: &CommonMetricData,
    error: ErrorType,
    ping_name: Option<&str>,
) -> Result<i32> {
    let storage = match ping_name.or_else(|| meta.send_in_pings.first().map(String::as_str)) {
        Some(storage) => storage,
        None => return Ok(0),
    };
    let error_meta = error_metric(error, &meta.base_identifier(), &meta.send_in_pings);
    let value = beacon.with_database(|db| {
        db.read(|conn| metrics::get(conn, Lifetime::Ping, storage, &error_meta.identifier()))
    })?;
    Ok(match value {
        Some(Metric::Counter(count)) => count,
        _ => 0,
    })
}
