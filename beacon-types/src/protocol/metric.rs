use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::common::TimeUnit;
use crate::utils::format_datetime;

/// A recorded metric value.
///
/// This is the closed set of value kinds that can be kept in storage. Each
/// variant knows how it is reported in a ping payload via [`Metric::as_json`]
/// and under which section it is grouped via [`Metric::ping_section`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum Metric {
    /// A boolean flag.
    Boolean(bool),
    /// A monotonically increasing count.
    Counter(i32),
    /// A single non-negative integer value.
    Quantity(i64),
    /// A short string.
    String(String),
    /// A list of short strings.
    StringList(Vec<String>),
    /// A UUID, kept in its hyphenated string form.
    Uuid(String),
    /// A measured span of time and the unit it is reported in.
    Timespan(Duration, TimeUnit),
    /// A point in time and the resolution it is reported in.
    Datetime(DateTime<FixedOffset>, TimeUnit),
}

impl Metric {
    /// The section of the `metrics` object this value is reported under.
    pub fn ping_section(&self) -> &'static str {
        match self {
            Metric::Boolean(_) => "boolean",
            Metric::Counter(_) => "counter",
            Metric::Quantity(_) => "quantity",
            Metric::String(_) => "string",
            Metric::StringList(_) => "string_list",
            Metric::Uuid(_) => "uuid",
            Metric::Timespan(..) => "timespan",
            Metric::Datetime(..) => "datetime",
        }
    }

    /// The payload representation of this value.
    pub fn as_json(&self) -> Value {
        match self {
            Metric::Boolean(b) => json!(b),
            Metric::Counter(c) => json!(c),
            Metric::Quantity(q) => json!(q),
            Metric::String(s) => json!(s),
            Metric::StringList(list) => json!(list),
            Metric::Uuid(uuid) => json!(uuid),
            Metric::Timespan(span, unit) => json!({
                "value": unit.duration_convert(*span),
                "time_unit": unit,
            }),
            Metric::Datetime(dt, unit) => json!(format_datetime(dt, *unit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_timespan_payload() {
        let metric = Metric::Timespan(Duration::from_millis(1234), TimeUnit::Millisecond);
        assert_eq!(metric.ping_section(), "timespan");
        assert_eq!(
            metric.as_json(),
            json!({"value": 1234, "time_unit": "millisecond"})
        );
    }

    #[test]
    fn test_datetime_payload_is_truncated() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let dt = offset
            .with_ymd_and_hms(2020, 5, 17, 11, 23, 45)
            .single()
            .unwrap();
        let metric = Metric::Datetime(dt, TimeUnit::Minute);
        assert_eq!(metric.as_json(), json!("2020-05-17T11:23+01:00"));
        let metric = Metric::Datetime(dt, TimeUnit::Day);
        assert_eq!(metric.as_json(), json!("2020-05-17+01:00"));
    }

    #[test]
    fn test_storage_roundtrip() {
        let metric = Metric::StringList(vec!["a".into(), "b".into()]);
        let stored = serde_json::to_string(&metric).unwrap();
        assert_eq!(serde_json::from_str::<Metric>(&stored).unwrap(), metric);
    }
}
