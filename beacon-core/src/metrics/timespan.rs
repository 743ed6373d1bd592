use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error_recording::record_error;
use crate::protocol::{CommonMetricData, ErrorType, Metric, TimeUnit};
use crate::{Beacon, Result};

/// A span of time, measured with [`start`](Self::start) and
/// [`stop`](Self::stop) or set directly.
///
/// A recorded span is never overwritten: once a value is stored, further
/// measurements are dropped with [`ErrorType::InvalidState`] until the
/// value was sent.
#[derive(Clone, Debug)]
pub struct TimespanMetric {
    meta: Arc<CommonMetricData>,
    time_unit: TimeUnit,
    start_time: Arc<RwLock<Option<Instant>>>,
}

impl TimespanMetric {
    /// Creates a handle reporting in `time_unit`.
    pub fn new(meta: CommonMetricData, time_unit: TimeUnit) -> Self {
        Self {
            meta: Arc::new(meta),
            time_unit,
            start_time: Arc::new(RwLock::new(None)),
        }
    }

    /// Starts measuring. Starting a running timer keeps the original start.
    pub fn start(&self, beacon: &Beacon) {
        let now = Instant::now();
        let metric = self.clone();
        beacon.launch(move |beacon| metric.set_start(beacon, now));
    }

    fn set_start(&self, beacon: &Beacon, now: Instant) {
        if !beacon.should_record(&self.meta) {
            return;
        }
        let mut start_time = self
            .start_time
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if start_time.is_some() {
            drop(start_time);
            record_error(
                beacon,
                &self.meta,
                ErrorType::InvalidState,
                "Timespan already started",
                None,
            );
            return;
        }
        *start_time = Some(now);
    }

    /// Stops measuring and records the elapsed time.
    pub fn stop(&self, beacon: &Beacon) {
        let now = Instant::now();
        let metric = self.clone();
        beacon.launch(move |beacon| metric.set_stop(beacon, now));
    }

    fn set_stop(&self, beacon: &Beacon, now: Instant) {
        let start_time = self
            .start_time
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if !beacon.should_record(&self.meta) {
            return;
        }
        match start_time {
            Some(start_time) => self.set_raw_sync(beacon, now.saturating_duration_since(start_time)),
            None => record_error(
                beacon,
                &self.meta,
                ErrorType::InvalidState,
                "Timespan not running",
                None,
            ),
        }
    }

    /// Aborts a running measurement without recording anything.
    pub fn cancel(&self, beacon: &Beacon) {
        let metric = self.clone();
        beacon.launch(move |_| {
            metric
                .start_time
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        });
    }

    /// Records an externally measured span.
    pub fn set_raw(&self, beacon: &Beacon, elapsed: Duration) {
        let metric = self.clone();
        beacon.launch(move |beacon| {
            if beacon.should_record(&metric.meta) {
                metric.set_raw_sync(beacon, elapsed);
            }
        });
    }

    fn set_raw_sync(&self, beacon: &Beacon, elapsed: Duration) {
        let mut already_recorded = false;
        beacon.record_with_sync(&self.meta, |old| match old {
            Some(old @ Metric::Timespan(..)) => {
                already_recorded = true;
                old
            }
            _ => Metric::Timespan(elapsed, self.time_unit),
        });
        if already_recorded {
            record_error(
                beacon,
                &self.meta,
                ErrorType::InvalidState,
                "Timespan value already recorded, new value discarded",
                None,
            );
        }
    }

    /// The stored span in the metric's time unit, for tests.
    pub fn test_get_value(&self, beacon: &Beacon, ping_name: Option<&str>) -> Option<u64> {
        match super::test_get_metric(beacon, &self.meta, ping_name) {
            Some(Metric::Timespan(span, unit)) => Some(unit.duration_convert(span)),
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
