use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::protocol::{CommonMetricData, ErrorType, Metric, TimeUnit};
use crate::types::{format_datetime, local_now_with_offset};
use crate::{Beacon, Result};

/// A point in time, reported with the resolution of its [`TimeUnit`].
#[derive(Clone, Debug)]
pub struct DatetimeMetric {
    meta: Arc<CommonMetricData>,
    time_unit: TimeUnit,
}

impl DatetimeMetric {
    /// Creates a handle reporting with `time_unit` resolution.
    pub fn new(meta: CommonMetricData, time_unit: TimeUnit) -> Self {
        Self {
            meta: Arc::new(meta),
            time_unit,
        }
    }

    /// Sets the value; `None` records the current local time.
    ///
    /// The full value is stored; truncation to the resolution happens when
    /// the ping is assembled.
    pub fn set(&self, beacon: &Beacon, value: Option<DateTime<FixedOffset>>) {
        let value = value.unwrap_or_else(local_now_with_offset);
        let meta = self.meta.clone();
        let metric = Metric::Datetime(value, self.time_unit);
        beacon.launch(move |beacon| beacon.record_sync(&meta, &metric));
    }

    /// The stored value, for tests.
    pub fn test_get_value(
        &self,
        beacon: &Beacon,
        ping_name: Option<&str>,
    ) -> Option<DateTime<FixedOffset>> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::Datetime(dt, _)) => Some(dt),
            _ => None,
        }
    }

    /// The stored value as it appears in a ping, for tests.
    pub fn test_get_value_as_string(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<String> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::Datetime(dt, unit)) => Some(format_datetime(&dt, unit)),
            _ => None,
        }
    }

    /// The number of errors of a type recorded for this metric.
    pub fn test_get_num_recorded_errors(
        &self,
        beacon: &Beacon,
        error: ErrorType,
        ping_name: Option<&str>,
    ) -> Result<i32> {
        super::test_get_errors(beacon, &self.meta, error, ping_name)
    }
}
