use std::sync::Arc;

use super::string::truncate_with_error;
use crate::error_recording::record_error;
use crate::protocol::{CommonMetricData, ErrorType, Metric};
use crate::{Beacon, Result};

/// The maximum number of items in a list.
pub const MAX_LIST_LENGTH: usize = 20;
/// The maximum length of a single item, in bytes.
pub const MAX_STRING_LIST_ITEM_LENGTH: usize = 50;

/// A list of short strings.
#[derive(Clone, Debug)]
pub struct StringListMetric {
    meta: Arc<CommonMetricData>,
}

impl StringListMetric {
    /// Creates a handle for the described metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self {
            meta: Arc::new(meta),
        }
    }

    /// Appends an item.
    ///
    /// Items longer than [`MAX_STRING_LIST_ITEM_LENGTH`] are truncated; once
    /// the list holds [`MAX_LIST_LENGTH`] items further ones are dropped
    /// with [`ErrorType::InvalidValue`].
    pub fn add<S: Into<String>>(&self, beacon: &Beacon, value: S) {
        let meta = self.meta.clone();
        let value = value.into();
        beacon.launch(move |beacon| {
            if !beacon.should_record(&meta) {
                return;
            }
            let value = truncate_with_error(beacon, &meta, value, MAX_STRING_LIST_ITEM_LENGTH);
            let mut full = false;
            beacon.record_with_sync(&meta, |old| match old {
                Some(Metric::StringList(mut list)) => {
                    if list.len() < MAX_LIST_LENGTH {
                        list.push(value.clone());
                    } else {
                        full = true;
                    }
                    Metric::StringList(list)
                }
                _ => Metric::StringList(vec![value.clone()]),
            });
            if full {
                record_error(
                    beacon,
                    &meta,
                    ErrorType::InvalidValue,
                    format!("String list length exceeds maximum of {}", MAX_LIST_LENGTH),
                    None,
                );
            }
        });
    }

    /// Replaces the list.
    ///
    /// Items beyond [`MAX_LIST_LENGTH`] are dropped with
    /// [`ErrorType::InvalidValue`], long items are truncated.
    pub fn set(&self, beacon: &Beacon, values: Vec<String>) {
        let meta = self.meta.clone();
        beacon.launch(move |beacon| {
            if !beacon.should_record(&meta) {
                return;
            }
            let mut values = values;
            if values.len() > MAX_LIST_LENGTH {
                record_error(
                    beacon,
                    &meta,
                    ErrorType::InvalidValue,
                    format!(
                        "String list length of {} exceeds maximum of {}",
                        values.len(),
                        MAX_LIST_LENGTH
                    ),
                    None,
                );
                values.truncate(MAX_LIST_LENGTH);
            }
            let values = values
                .into_iter()
                .map(|value| truncate_with_error(beacon, &meta, value, MAX_STRING_LIST_ITEM_LENGTH))
                .collect();
            beacon.record_sync(&meta, &Metric::StringList(values));
        });
    }

    /// The stored list, for tests.
    pub fn test_get_value(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<Vec<String>> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::StringList(list)) => Some(list),
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
