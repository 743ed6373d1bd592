use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon::metrics::{CounterMetric, EventMetric};
use beacon::upload::UploadOutcome;
use beacon::{ClientInfoMetrics, CommonMetricData, Configuration, Uploader, Url};

#[derive(Default)]
struct RecordingUploader {
    urls: Mutex<Vec<Url>>,
}

impl Uploader for RecordingUploader {
    fn upload(&self, url: &Url, _: &[u8], _: &BTreeMap<String, String>) -> UploadOutcome {
        self.urls.lock().unwrap().push(url.clone());
        UploadOutcome::Success
    }
}

impl RecordingUploader {
    fn ping_names(&self) -> Vec<String> {
        self.urls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|url| url.path_segments()?.nth(2).map(str::to_owned))
            .collect()
    }
}

#[test]
fn test_submitted_ping_is_uploaded_by_worker() {
    let _ = pretty_env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let uploader = Arc::new(RecordingUploader::default());
    let guard = beacon::init(
        Configuration::new(dir.path(), "org.example.test"),
        ClientInfoMetrics::unknown(),
        uploader.clone(),
    );
    assert!(guard.is_enabled());

    let counter = CounterMetric::new(CommonMetricData::new("test", "count", "metrics"));
    counter.add(guard.beacon().unwrap(), 1);
    guard.submit_ping("metrics", None);
    assert!(guard.flush(Duration::from_secs(5)));

    assert_eq!(uploader.ping_names(), vec!["metrics"]);
    let url = uploader.urls.lock().unwrap()[0].clone();
    assert!(url
        .as_str()
        .starts_with("https://incoming.telemetry.invalid/submit/org-example-test/metrics/1/"));
    assert!(guard
        .beacon()
        .unwrap()
        .test_get_pending_pings()
        .unwrap()
        .is_empty());
}

#[test]
fn test_dropping_guard_delivers_shutdown_pings() {
    let dir = tempfile::tempdir().unwrap();
    let uploader = Arc::new(RecordingUploader::default());
    let guard = beacon::init(
        Configuration::new(dir.path(), "org.example.test"),
        ClientInfoMetrics::unknown(),
        uploader.clone(),
    );

    let click = EventMetric::new(CommonMetricData::new("ui", "click", "events"), vec![]);
    click.record(guard.beacon().unwrap(), None);
    drop(guard);

    assert_eq!(uploader.ping_names(), vec!["events"]);
}

#[test]
fn test_invalid_configuration_yields_disabled_guard() {
    let dir = tempfile::tempdir().unwrap();
    let guard = beacon::init(
        Configuration::new(dir.path(), ""),
        ClientInfoMetrics::unknown(),
        RecordingUploader::default(),
    );
    assert!(!guard.is_enabled());
    assert!(guard.beacon().is_none());
    guard.submit_ping("metrics", None);
    assert!(guard.flush(Duration::from_millis(10)));
}
