use std::sync::Arc;

use crate::protocol::{CommonMetricData, ErrorType, Metric};
use crate::types::{random_uuid, Uuid};
use crate::{Beacon, Result};

/// A UUID, last write wins.
#[derive(Clone, Debug)]
pub struct UuidMetric {
    meta: Arc<CommonMetricData>,
}

impl UuidMetric {
    /// Creates a handle for the described metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
        }
    }

    /// Sets the value.
    pub fn set(&self, beacon: &Beacon, value: Uuid) {
        let meta = self.meta.clone();
        let value = Metric::Uuid(value.to_string());
        beacon.launch(move |beacon| beacon.record_sync(&meta, &value));
    }

    /// Generates a random v4 UUID, stores and returns it.
    pub fn generate_and_set(&self, beacon: &Beacon) -> Uuid {
        let uuid = random_uuid();
        self.set(beacon, uuid);
        uuid
    }

    /// The stored value, for tests.
    pub fn test_get_value(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<Uuid> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::Uuid(uuid)) => Uuid::parse_str(&uuid).ok(),
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
