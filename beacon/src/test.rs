//! This provides testing functionality for building tests.
//!
//! **Feature:** `test` (*disabled by default*)
//!
//! If the beacon crate has been compiled with the test feature this module
//! becomes available and provides functionality to capture uploads made
//! within a block.
//!
//! # Example usage
//!
//! ```
//! use beacon::metrics::CounterMetric;
//! use beacon::test::with_captured_uploads;
//! use beacon::CommonMetricData;
//!
//! let uploads = with_captured_uploads(|beacon| {
//!     let counter = CounterMetric::new(CommonMetricData::new("app", "opened", "metrics"));
//!     counter.add(beacon, 1);
//!     beacon.submit_ping_by_name("metrics", None);
//! });
//! assert_eq!(uploads.len(), 1);
//! assert_eq!(uploads[0].ping_name(), Some("metrics"));
//! ```
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use beacon_core::protocol::PingPayload;
use beacon_core::upload::UploadOutcome;
use beacon_core::{Beacon, ClientInfoMetrics, Configuration, Uploader, Url};

/// An upload recorded by the [`TestUploader`].
#[derive(Clone, Debug)]
pub struct CapturedUpload {
    /// The full submission URL.
    pub url: Url,
    /// The request body.
    pub body: Vec<u8>,
    /// The request headers.
    pub headers: BTreeMap<String, String>,
}

impl CapturedUpload {
    /// Parses the body as a ping document.
    pub fn payload(&self) -> Result<PingPayload, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// The ping name, taken from the submission path.
    ///
    /// Paths look like `/submit/<app>/<ping>/<version>/<document id>`.
    pub fn ping_name(&self) -> Option<&str> {
        self.url.path_segments()?.nth(2)
    }
}

/// Collects uploads instead of sending them.
///
/// Every upload is answered with [`UploadOutcome::Success`] unless an outcome
/// was queued with [`push_outcome`](TestUploader::push_outcome).
///
/// Example usage:
///
/// ```rust
/// use beacon::test::TestUploader;
/// use beacon::{ClientInfoMetrics, Configuration};
///
/// let dir = tempfile::tempdir().unwrap();
/// let uploader = TestUploader::new();
/// let guard = beacon::init(
///     Configuration::new(dir.path(), "org.example.app"),
///     ClientInfoMetrics::unknown(),
///     uploader.clone(),
/// );
/// drop(guard);
/// assert!(uploader.fetch_and_clear_uploads().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct TestUploader {
    collected: Mutex<Vec<CapturedUpload>>,
    outcomes: Mutex<VecDeque<UploadOutcome>>,
}

impl TestUploader {
    /// Creates a new test uploader.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<TestUploader> {
        Arc::new(TestUploader::default())
    }

    /// Answers the next upload with `outcome`.
    pub fn push_outcome(&self, outcome: UploadOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Fetches and clears the captured uploads.
    pub fn fetch_and_clear_uploads(&self) -> Vec<CapturedUpload> {
        let mut guard = self.collected.lock().unwrap();
        std::mem::take(&mut *guard)
    }
}

impl Uploader for TestUploader {
    fn upload(&self, url: &Url, body: &[u8], headers: &BTreeMap<String, String>) -> UploadOutcome {
        self.collected.lock().unwrap().push(CapturedUpload {
            url: url.clone(),
            body: body.to_vec(),
            headers: headers.clone(),
        });
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(UploadOutcome::Success)
    }
}

/// Runs some code against a fresh context and returns the captured uploads.
///
/// The context lives in a temporary directory and is shut down when the
/// closure returns, so pings submitted on shutdown are captured too.
pub fn with_captured_uploads<F: FnOnce(&Beacon)>(f: F) -> Vec<CapturedUpload> {
    with_captured_uploads_options(f, |_| {})
}

/// Runs some code against a fresh context with adjusted configuration and
/// returns the captured uploads.
pub fn with_captured_uploads_options<F, C>(f: F, configure: C) -> Vec<CapturedUpload>
where
    F: FnOnce(&Beacon),
    C: FnOnce(&mut Configuration),
{
    let dir = tempfile::tempdir().unwrap();
    let mut configuration = Configuration::new(dir.path(), "org.example.test");
    configure(&mut configuration);

    let uploader = TestUploader::new();
    let guard = crate::init(configuration, ClientInfoMetrics::unknown(), uploader.clone());
    f(guard.beacon().expect("test context failed to start"));
    drop(guard);
    uploader.fetch_and_clear_uploads()
}
