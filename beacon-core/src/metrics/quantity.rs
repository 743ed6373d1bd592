use std::sync::Arc;

use crate::error_recording::record_error;
use crate::protocol::{CommonMetricData, ErrorType, Metric};
use crate::{Beacon, Result};

/// A single non-negative integer, last write wins.
#[derive(Clone, Debug)]
pub struct QuantityMetric {
    meta: Arc<CommonMetricData>,
}

impl QuantityMetric {
    /// Creates a handle for the described metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
        }
    }

    /// Sets the value. Negative values are rejected.
    pub fn set(&self, beacon: &Beacon, value: i64) {
        let meta = self.meta.clone();
        beacon.launch(move |beacon| {
            if !beacon.should_record(&meta) {
                return;
            }
            if value < 0 {
                record_error(
                    beacon,
                    &meta,
                    ErrorType::InvalidValue,
                    format!("Set negative value {}", value),
                    None,
                );
                return;
            }
            beacon.record_sync(&meta, &Metric::Quantity(value));
        });
    }

    /// The stored value, for tests.
    pub fn test_get_value(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<i64> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::Quantity(q)) => Some(q),
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
