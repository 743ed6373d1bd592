//! Typed handles for recording metrics.
//!
//! A handle wraps the static [`CommonMetricData`] of one metric and knows
//! how to validate and accumulate values of its kind. Handles are cheap to
//! clone and do not hold a reference to the [`Beacon`] context; every
//! operation takes it explicitly.
//!
//! Recording never fails towards the caller. Invalid input is dropped (or
//! truncated) and counted in the `beacon.error.*` metrics, which can be
//! inspected with `test_get_num_recorded_errors`.

use crate::protocol::{CommonMetricData, ErrorType, Metric};
use crate::{Beacon, Result};

mod boolean;
mod counter;
mod datetime;
mod event;
mod labeled;
mod quantity;
mod string;
mod string_list;
mod timespan;
mod uuid;

pub use self::boolean::BooleanMetric;
pub use self::counter::CounterMetric;
pub use self::datetime::DatetimeMetric;
pub use self::event::EventMetric;
pub use self::labeled::{LabeledCounter, OTHER_LABEL};
pub use self::quantity::QuantityMetric;
pub use self::string::{StringMetric, MAX_STRING_LENGTH};
pub use self::string_list::{StringListMetric, MAX_LIST_LENGTH, MAX_STRING_LIST_ITEM_LENGTH};
pub use self::timespan::TimespanMetric;
pub use self::uuid::UuidMetric;

/// The stored value of a metric, read from `ping_name` or the metric's
/// first ping.
fn test_get_metric(
    beacon: &Beacon,
    meta: &CommonMetricData,
    ping_name: Option<&str>,
) -> Option<Metric> {
    let storage = ping_name.or_else(|| meta.send_in_pings.first().map(String::as_str))?;
    beacon
        .database()?
        .get_metric(meta.lifetime, storage, &meta.identifier())
        .ok()
        .flatten()
}

fn test_get_errors(
    beacon: &Beacon,
    meta: &CommonMetricData,
    error: ErrorType,
    ping_name: Option<&str>,
) -> Result<i32> {
    crate::error_recording::test_get_num_recorded_errors(beacon, meta, error, ping_name)
}
