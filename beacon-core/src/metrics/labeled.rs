use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::Connection;

use super::CounterMetric;
use crate::database::metrics;
use crate::error_recording::record_error_in;
use crate::protocol::{CommonMetricData, ErrorType};
use crate::{beacon_debug, Beacon, Result};

/// The label values are recorded under when their own label is unusable.
pub const OTHER_LABEL: &str = "__other__";

/// The number of distinct dynamic labels kept per metric.
const MAX_LABELS: usize = 16;
/// The maximum length of a label, in bytes.
const MAX_LABEL_LENGTH: usize = 61;

/// A counter split by label.
///
/// With static labels, any other label is recorded as [`OTHER_LABEL`].
/// Without them, labels are checked when recording: a label that does not
/// match `[a-z_][a-z0-9_-]*(\.[a-z0-9_-]+)*`, is longer than 61 bytes or
/// would exceed 16 distinct labels is recorded as [`OTHER_LABEL`], the first
/// two with [`ErrorType::InvalidLabel`].
#[derive(Clone, Debug)]
pub struct LabeledCounter {
    meta: Arc<CommonMetricData>,
    labels: Option<Arc<Vec<String>>>,
}

impl LabeledCounter {
    /// Creates a labeled counter, optionally restricted to `labels`.
    pub fn new(meta: CommonMetricData, labels: Option<Vec<String>>) -> Self {
        Self {
            meta: Arc::new(meta),
            labels: labels.map(Arc::new),
        }
    }

    /// The counter for one label.
    pub fn get<S: AsRef<str>>(&self, label: S) -> CounterMetric {
        let label = label.as_ref();
        let mut meta = (*self.meta).clone();
        match self.labels {
            Some(ref labels) => {
                let label = if labels.iter().any(|known| known == label) {
                    label
                } else {
                    OTHER_LABEL
                };
                meta.dynamic_label = Some(label.to_owned());
                CounterMetric::new(meta)
            }
            None => {
                meta.dynamic_label = Some(label.to_owned());
                CounterMetric::with_dynamic_label(meta)
            }
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

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
        return false;
    }
    let mut segments = label.split('.');
    let head = match segments.next() {
        Some(head) => head,
        None => return false,
    };
    let first_ok = head
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_lowercase() || c == '_');
    let body_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-';
    first_ok
        && head.chars().all(body_char)
        && segments.all(|segment| !segment.is_empty() && segment.chars().all(body_char))
}

/// Maps the dynamic label of `meta` to the label it is stored under.
///
/// Runs inside the recording transaction, so the label count cannot change
/// between the check and the write.
pub(crate) fn resolve_label<'a>(
    conn: &Connection,
    meta: &'a CommonMetricData,
) -> Result<Cow<'a, CommonMetricData>> {
    let label = match meta.dynamic_label {
        Some(ref label) => label.as_str(),
        None => return Ok(Cow::Borrowed(meta)),
    };
    let base = meta.base_identifier();

    let mut seen = BTreeSet::new();
    for storage in &meta.send_in_pings {
        seen.extend(metrics::labels_of(conn, meta.lifetime, storage, &base)?);
    }
    if seen.contains(label) {
        return Ok(Cow::Borrowed(meta));
    }

    let replacement = if !is_valid_label(label) {
        beacon_debug!("[Labeled] invalid label {:?} for {}", label, base);
        record_error_in(conn, &base, &meta.send_in_pings, ErrorType::InvalidLabel, 1)?;
        true
    } else {
        seen.iter().filter(|known| *known != OTHER_LABEL).count() >= MAX_LABELS
    };

    if replacement {
        let mut meta = meta.clone();
        meta.dynamic_label = Some(OTHER_LABEL.to_owned());
        Ok(Cow::Owned(meta))
    } else {
        Ok(Cow::Borrowed(meta))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::database::schema_for_tests;
    use crate::protocol::{Lifetime, Metric};

    #[rstest]
    #[case("net", true)]
    #[case("_private", true)]
    #[case("group.sub-label_2", true)]
    #[case("Net", false)]
    #[case("2fast", false)]
    #[case("trailing.", false)]
    #[case("with space", false)]
    #[case("", false)]
    fn test_label_validation(#[case] label: &str, #[case] valid: bool) {
        assert_eq!(is_valid_label(label), valid);
    }

    #[test]
    fn test_long_label_is_invalid() {
        assert!(!is_valid_label(&"a".repeat(62)));
        assert!(is_valid_label(&"a".repeat(61)));
    }

    #[test]
    fn test_labels_beyond_limit_become_other() {
        let conn = schema_for_tests();
        let base = CommonMetricData::new("net", "errors", "metrics");
        for i in 0..MAX_LABELS {
            let meta = CommonMetricData {
                dynamic_label: Some(format!("label_{}", i)),
                ..base.clone()
            };
            metrics::record(&conn, &meta, &Metric::Counter(1)).unwrap();
        }

        let known = CommonMetricData {
            dynamic_label: Some("label_3".to_owned()),
            ..base.clone()
        };
        assert_eq!(resolve_label(&conn, &known).unwrap().identifier(), "net.errors/label_3");

        let fresh = CommonMetricData {
            dynamic_label: Some("label_99".to_owned()),
            ..base.clone()
        };
        assert_eq!(resolve_label(&conn, &fresh).unwrap().identifier(), "net.errors/__other__");
    }

    #[test]
    fn test_invalid_label_records_error() {
        let conn = schema_for_tests();
        let meta = CommonMetricData {
            dynamic_label: Some("Not Valid".to_owned()),
            ..CommonMetricData::new("net", "errors", "metrics")
        };
        let resolved = resolve_label(&conn, &meta).unwrap();
        assert_eq!(resolved.dynamic_label.as_deref(), Some(OTHER_LABEL));
        assert_eq!(
            metrics::get(&conn, Lifetime::Ping, "metrics", "beacon.error.invalid_label/net.errors")
                .unwrap(),
            Some(Metric::Counter(1))
        );
    }
}
