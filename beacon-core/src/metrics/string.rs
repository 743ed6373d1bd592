use std::sync::Arc;

use crate::error_recording::record_error;
use crate::protocol::{CommonMetricData, ErrorType, Metric};
use crate::types::truncate_string_at_boundary;
use crate::{Beacon, Result};

/// The maximum length of a string value, in bytes.
pub const MAX_STRING_LENGTH: usize = 100;

/// Truncates `value` to `length` bytes, recording an overflow if it was cut.
pub(crate) fn truncate_with_error(
    beacon: &Beacon,
    meta: &CommonMetricData,
    value: String,
    length: usize,
) -> String {
    if value.len() <= length {
        return value;
    }
    record_error(
        beacon,
        meta,
        ErrorType::InvalidOverflow,
        format!("Value length {} exceeds maximum of {}", value.len(), length),
        None,
    );
    truncate_string_at_boundary(value, length)
}

/// A short string, last write wins.
#[derive(Clone, Debug)]
pub struct StringMetric {
    meta: Arc<CommonMetricData>,
}

impl StringMetric {
    /// Creates a handle for the described metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
        }
    }

    /// Sets the value, truncated to [`MAX_STRING_LENGTH`] bytes.
    pub fn set<S: Into<String>>(&self, beacon: &Beacon, value: S) {
        let meta = self.meta.clone();
        let value = value.into();
        beacon.launch(move |beacon| {
            if !beacon.should_record(&meta) {
                return;
            }
            let value = truncate_with_error(beacon, &meta, value, MAX_STRING_LENGTH);
            beacon.record_sync(&meta, &Metric::String(value));
        });
    }

    /// The stored value, for tests.
    pub fn test_get_value(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<String> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::String(s)) => Some(s),
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
