use std::sync::Arc;

use crate::protocol::{CommonMetricData, ErrorType, Metric};
use crate::{Beacon, Result};

/// A boolean flag, last write wins.
#[derive(Clone, Debug)]
pub struct BooleanMetric {
    meta: Arc<CommonMetricData>,
}

impl BooleanMetric {
    /// Creates a handle for the described metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
        }
    }

    /// Sets the flag.
    pub fn set(&self, beacon: &Beacon, value: bool) {
        let meta = self.meta.clone();
        beacon.launch(move |beacon| beacon.record_sync(&meta, &Metric::Boolean(value)));
    }

    /// The stored value, for tests.
    pub fn test_get_value(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<bool> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::Boolean(b)) => Some(b),
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
