use std::convert::TryFrom;
use std::fmt;
use std::str;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The lifetime of a recorded metric value.
///
/// The lifetime decides when a stored value is cleared again.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// The value is cleared once it was included in a ping.
    Ping,
    /// The value is cleared when the application restarts.
    Application,
    /// The value lives until the user resets their data.
    User,
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::Ping
    }
}

impl Lifetime {
    /// All lifetimes, in the order they are snapshotted.
    pub const ALL: [Lifetime; 3] = [Lifetime::Ping, Lifetime::Application, Lifetime::User];

    /// The string used to key values of this lifetime in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Lifetime::Ping => "ping",
            Lifetime::Application => "app",
            Lifetime::User => "user",
        }
    }
}

/// An error used when parsing `Lifetime`.
#[derive(Debug, Error)]
#[error("invalid lifetime")]
pub struct ParseLifetimeError;

impl str::FromStr for Lifetime {
    type Err = ParseLifetimeError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        Ok(match string {
            "ping" => Lifetime::Ping,
            "app" | "application" => Lifetime::Application,
            "user" => Lifetime::User,
            _ => return Err(ParseLifetimeError),
        })
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The resolution used when reporting time based metrics.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Nanosecond resolution.
    Nanosecond,
    /// Microsecond resolution.
    Microsecond,
    /// Millisecond resolution.
    Millisecond,
    /// Second resolution.
    Second,
    /// Minute resolution.
    Minute,
    /// Hour resolution.
    Hour,
    /// Day resolution.
    Day,
}

impl TimeUnit {
    /// The `chrono` format string that truncates a datetime to this resolution.
    pub fn format_pattern(self) -> &'static str {
        match self {
            TimeUnit::Nanosecond => "%Y-%m-%dT%H:%M:%S%.f%:z",
            TimeUnit::Microsecond => "%Y-%m-%dT%H:%M:%S%.6f%:z",
            TimeUnit::Millisecond => "%Y-%m-%dT%H:%M:%S%.3f%:z",
            TimeUnit::Second => "%Y-%m-%dT%H:%M:%S%:z",
            TimeUnit::Minute => "%Y-%m-%dT%H:%M%:z",
            TimeUnit::Hour => "%Y-%m-%dT%H%:z",
            TimeUnit::Day => "%Y-%m-%d%:z",
        }
    }

    /// Converts a duration into an integer amount of this unit, rounding down.
    pub fn duration_convert(self, duration: Duration) -> u64 {
        let value = match self {
            TimeUnit::Nanosecond => duration.as_nanos(),
            TimeUnit::Microsecond => duration.as_micros(),
            TimeUnit::Millisecond => duration.as_millis(),
            TimeUnit::Second => u128::from(duration.as_secs()),
            TimeUnit::Minute => u128::from(duration.as_secs() / 60),
            TimeUnit::Hour => u128::from(duration.as_secs() / (60 * 60)),
            TimeUnit::Day => u128::from(duration.as_secs() / (60 * 60 * 24)),
        };
        u64::try_from(value).unwrap_or(u64::MAX)
    }

    /// Converts an integer amount of this unit into a duration.
    pub fn as_duration(self, value: u64) -> Duration {
        match self {
            TimeUnit::Nanosecond => Duration::from_nanos(value),
            TimeUnit::Microsecond => Duration::from_micros(value),
            TimeUnit::Millisecond => Duration::from_millis(value),
            TimeUnit::Second => Duration::from_secs(value),
            TimeUnit::Minute => Duration::from_secs(value.saturating_mul(60)),
            TimeUnit::Hour => Duration::from_secs(value.saturating_mul(60 * 60)),
            TimeUnit::Day => Duration::from_secs(value.saturating_mul(60 * 60 * 24)),
        }
    }

    /// The name of the unit as it appears in ping payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Nanosecond => "nanosecond",
            TimeUnit::Microsecond => "microsecond",
            TimeUnit::Millisecond => "millisecond",
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        }
    }
}

/// An error used when parsing `TimeUnit`.
#[derive(Debug, Error)]
#[error("invalid time unit")]
pub struct ParseTimeUnitError;

impl str::FromStr for TimeUnit {
    type Err = ParseTimeUnitError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        Ok(match string {
            "nanosecond" => TimeUnit::Nanosecond,
            "microsecond" => TimeUnit::Microsecond,
            "millisecond" => TimeUnit::Millisecond,
            "second" => TimeUnit::Second,
            "minute" => TimeUnit::Minute,
            "hour" => TimeUnit::Hour,
            "day" => TimeUnit::Day,
            _ => return Err(ParseTimeUnitError),
        })
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of error recorded against a metric.
///
/// Errors are never reported to the caller. They are counted in the
/// `beacon.error.*` metrics, labeled with the offending metric.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The value passed to the metric was invalid, e.g. a negative count.
    InvalidValue,
    /// The label of a labeled metric was invalid.
    InvalidLabel,
    /// The metric was used in an invalid state, e.g. stopping an unstarted timer.
    InvalidState,
    /// The value exceeded a length or size limit and was truncated.
    InvalidOverflow,
}

impl ErrorType {
    /// All error types.
    pub const ALL: [ErrorType; 4] = [
        ErrorType::InvalidValue,
        ErrorType::InvalidLabel,
        ErrorType::InvalidState,
        ErrorType::InvalidOverflow,
    ];

    /// The name of the error metric for this error type.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::InvalidValue => "invalid_value",
            ErrorType::InvalidLabel => "invalid_label",
            ErrorType::InvalidState => "invalid_state",
            ErrorType::InvalidOverflow => "invalid_overflow",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The static description shared by every metric.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct CommonMetricData {
    /// The metric's name.
    pub name: String,
    /// The metric's category. May be empty for internal metrics.
    pub category: String,
    /// The pings this metric is sent in.
    pub send_in_pings: Vec<String>,
    /// The lifetime of the metric's values.
    #[serde(default)]
    pub lifetime: Lifetime,
    /// Whether recording to this metric is disabled.
    #[serde(default)]
    pub disabled: bool,
    /// The label of a labeled metric submetric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_label: Option<String>,
}

impl CommonMetricData {
    /// Creates the description of a ping lifetime metric.
    pub fn new<C, N, P>(category: C, name: N, ping: P) -> Self
    where
        C: Into<String>,
        N: Into<String>,
        P: Into<String>,
    {
        CommonMetricData {
            name: name.into(),
            category: category.into(),
            send_in_pings: vec![ping.into()],
            ..Default::default()
        }
    }

    /// The `category.name` identifier without any label.
    pub fn base_identifier(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.category, self.name)
        }
    }

    /// The identifier used as storage key, `category.name/label` for labeled submetrics.
    pub fn identifier(&self) -> String {
        let base = self.base_identifier();
        match self.dynamic_label {
            Some(ref label) => format!("{}/{}", base, label),
            None => base,
        }
    }

    /// The storage names (ping names) this metric is recorded into.
    pub fn storage_names(&self) -> &[String] {
        &self.send_in_pings
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_identifier() {
        let mut meta = CommonMetricData::new("browser", "clicks", "metrics");
        assert_eq!(meta.identifier(), "browser.clicks");
        meta.dynamic_label = Some("left".into());
        assert_eq!(meta.identifier(), "browser.clicks/left");
        assert_eq!(meta.base_identifier(), "browser.clicks");

        let internal = CommonMetricData::new("", "client_id", "metrics");
        assert_eq!(internal.identifier(), "client_id");
    }

    #[rstest]
    #[case(TimeUnit::Nanosecond, 1_500_000_000)]
    #[case(TimeUnit::Microsecond, 1_500_000)]
    #[case(TimeUnit::Millisecond, 1_500)]
    #[case(TimeUnit::Second, 1)]
    #[case(TimeUnit::Minute, 0)]
    fn test_duration_convert(#[case] unit: TimeUnit, #[case] expected: u64) {
        assert_eq!(unit.duration_convert(Duration::from_millis(1500)), expected);
    }

    #[test]
    fn test_lifetime_parse() {
        assert_eq!("app".parse::<Lifetime>().unwrap(), Lifetime::Application);
        assert_eq!(Lifetime::User.to_string(), "user");
        assert!("forever".parse::<Lifetime>().is_err());
    }
}
