use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use super::string::truncate_with_error;
use crate::database::events;
use crate::error_recording::record_error;
use crate::protocol::{CommonMetricData, ErrorType, RecordedEvent};
use crate::{Beacon, Result};

/// The maximum length of an extra value, in bytes.
pub const MAX_EXTRA_VALUE_LENGTH: usize = 100;

/// An event, recorded with a timestamp and optional extras.
///
/// Events always have Ping lifetime. When a ping's event buffer reaches the
/// configured maximum, the ping is submitted with reason `max_capacity`.
#[derive(Clone, Debug)]
pub struct EventMetric {
    meta: Arc<CommonMetricData>,
    allowed_extra_keys: Arc<Vec<String>>,
}

impl EventMetric {
    /// Creates a handle accepting only `allowed_extra_keys` as extras.
    pub fn new(meta: CommonMetricData, allowed_extra_keys: Vec<String>) -> Self {
        Self {
            meta: Arc::new(meta),
            allowed_extra_keys: Arc::new(allowed_extra_keys),
        }
    }

    /// Records the event now.
    ///
    /// An extra key that is not allowed drops the whole event with
    /// [`ErrorType::InvalidValue`]. Long extra values are truncated.
    pub fn record(&self, beacon: &Beacon, extra: Option<BTreeMap<String, String>>) {
        let timestamp = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let metric = self.clone();
        beacon.launch(move |beacon| metric.record_sync(beacon, timestamp, extra));
    }

    fn record_sync(&self, beacon: &Beacon, timestamp: u64, extra: Option<BTreeMap<String, String>>) {
        if !beacon.should_record(&self.meta) {
            return;
        }

        let extra = match extra {
            Some(extra) if !extra.is_empty() => {
                let mut validated = BTreeMap::new();
                for (key, value) in extra {
                    if !self.allowed_extra_keys.contains(&key) {
                        record_error(
                            beacon,
                            &self.meta,
                            ErrorType::InvalidValue,
                            format!("Invalid extra key {}", key),
                            None,
                        );
                        return;
                    }
                    let value = truncate_with_error(beacon, &self.meta, value, MAX_EXTRA_VALUE_LENGTH);
                    validated.insert(key, value);
                }
                Some(validated)
            }
            _ => None,
        };

        let event = RecordedEvent {
            timestamp,
            category: self.meta.category.clone(),
            name: self.meta.name.clone(),
            extra,
        };
        beacon.record_event_sync(&self.meta, event);
    }

    /// The events stored for a ping, oldest first, for tests.
    pub fn test_get_value(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<Vec<RecordedEvent>> {
        let storage = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        let (recorded, _) = beacon
            .database()?
            .read(|conn| events::snapshot(conn, storage))
            .ok()?;
        let identifier = self.meta.base_identifier();
        let recorded: Vec<_> = recorded
            .into_iter()
            .filter(|event| event.identifier() == identifier)
            .collect();
        if recorded.is_empty() {
            None
        } else {
            Some(recorded)
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
