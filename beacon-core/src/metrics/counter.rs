use std::borrow::Cow;
use std::sync::Arc;

use super::labeled;
use crate::database::metrics;
use crate::error_recording::record_error;
use crate::protocol::{CommonMetricData, ErrorType, Metric};
use crate::{beacon_warn, Beacon, Result};

/// A monotonically increasing count.
///
/// Also the submetric type of [`LabeledCounter`](super::LabeledCounter).
#[derive(Clone, Debug)]
pub struct CounterMetric {
    meta: Arc<CommonMetricData>,
    /// The label still needs to be checked against the stored labels.
    dynamic_label: bool,
}

impl CounterMetric {
    /// Creates a handle for the described metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
            dynamic_label: false,
        }
    }

    pub(crate) fn with_dynamic_label(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
            dynamic_label: true,
        }
    }

    /// Adds `amount` to the count.
    ///
    /// Amounts that are zero or negative are rejected with
    /// [`ErrorType::InvalidValue`]. The count saturates at `i32::MAX`.
    pub fn add(&self, beacon: &Beacon, amount: i32) {
        let metric = self.clone();
        beacon.launch(move |beacon| metric.add_sync(beacon, amount));
    }

    pub(crate) fn add_sync(&self, beacon: &Beacon, amount: i32) {
        if !beacon.should_record(&self.meta) {
            return;
        }
        if amount <= 0 {
            record_error(
                beacon,
                &self.meta,
                ErrorType::InvalidValue,
                format!("Added negative or zero value {}", amount),
                None,
            );
            return;
        }

        let result = beacon.with_database(|db| {
            db.write(|tx| {
                let meta = if self.dynamic_label {
                    labeled::resolve_label(tx, &self.meta)?
                } else {
                    Cow::Borrowed(&*self.meta)
                };
                metrics::record_with(tx, &meta, |old| match old {
                    Some(Metric::Counter(old)) => Metric::Counter(old.saturating_add(amount)),
                    _ => Metric::Counter(amount),
                })
            })
        });
        if let Err(err) = result {
            beacon_warn!("[Counter] failed to add to {}: {}", self.meta.identifier(), err);
        }
    }

    /// The stored count, for tests.
    pub fn test_get_value(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<i32> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::Counter(count)) => Some(count),
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
