use std::time::Duration;

use serde_json::json;

use beacon::metrics::{CounterMetric, StringMetric};
use beacon::test::{with_captured_uploads, with_captured_uploads_options, TestUploader};
use beacon::upload::{BackoffPolicy, Policy, UploadOutcome};
use beacon::{ClientInfoMetrics, CommonMetricData, Configuration};

#[test]
fn test_basic_capture() {
    let uploads = with_captured_uploads(|beacon| {
        let counter = CounterMetric::new(CommonMetricData::new("app", "opened", "metrics"));
        let channel = StringMetric::new(CommonMetricData::new("app", "channel", "metrics"));
        counter.add(beacon, 2);
        channel.set(beacon, "nightly");
        beacon.submit_ping_by_name("metrics", Some("manual"));
    });

    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.ping_name(), Some("metrics"));
    assert_eq!(
        upload.headers.get("Content-Type").map(String::as_str),
        Some("application/json; charset=utf-8")
    );

    let payload = upload.payload().unwrap();
    assert_eq!(payload.ping_info.reason.as_deref(), Some("manual"));
    assert_eq!(payload.metric("counter", "app.opened"), Some(&json!(2)));
    assert_eq!(payload.metric("string", "app.channel"), Some(&json!("nightly")));
}

#[test]
fn test_debug_view_tag_header() {
    let uploads = with_captured_uploads_options(
        |beacon| {
            let counter = CounterMetric::new(CommonMetricData::new("app", "opened", "metrics"));
            counter.add(beacon, 1);
            beacon.submit_ping_by_name("metrics", None);
        },
        |configuration| {
            configuration.set_debug_view_tag(Some("my-tag".into()));
        },
    );

    assert_eq!(uploads.len(), 1);
    assert_eq!(
        uploads[0].headers.get("X-Debug-ID").map(String::as_str),
        Some("my-tag")
    );
}

#[test]
fn test_opt_out_uploads_deletion_request_only() {
    let uploads = with_captured_uploads(|beacon| {
        let counter = CounterMetric::new(CommonMetricData::new("app", "opened", "metrics"));
        counter.add(beacon, 1);
        beacon.set_upload_enabled(false);
        beacon.submit_ping_by_name("metrics", None);
    });

    let names: Vec<_> = uploads.iter().filter_map(|upload| upload.ping_name()).collect();
    assert_eq!(names, vec!["deletion-request"]);
    let payload = uploads[0].payload().unwrap();
    assert_eq!(payload.ping_info.reason.as_deref(), Some("upload_disabled"));
}

#[test]
fn test_recoverable_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let uploader = TestUploader::new();
    uploader.push_outcome(UploadOutcome::recoverable());
    let configuration = Configuration {
        upload_policy: Policy {
            backoff: BackoffPolicy {
                base: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Configuration::new(dir.path(), "org.example.test")
    };

    let guard = beacon::init(configuration, ClientInfoMetrics::unknown(), uploader.clone());
    let counter = CounterMetric::new(CommonMetricData::new("app", "opened", "metrics"));
    counter.add(guard.beacon().unwrap(), 1);
    guard.submit_ping("metrics", None);
    assert!(guard.flush(Duration::from_secs(5)));

    let uploads = uploader.fetch_and_clear_uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].url, uploads[1].url);
    assert!(guard
        .beacon()
        .unwrap()
        .test_get_pending_pings()
        .unwrap()
        .is_empty());
}

#[test]
fn test_reset_starts_with_empty_storage() {
    let dir = tempfile::tempdir().unwrap();
    let uploader = TestUploader::new();
    let mut guard = beacon::init(
        Configuration::new(dir.path(), "org.example.test"),
        ClientInfoMetrics::unknown(),
        uploader.clone(),
    );
    let account = StringMetric::new(CommonMetricData {
        lifetime: beacon::Lifetime::User,
        ..CommonMetricData::new("app", "account", "metrics")
    });
    account.set(guard.beacon().unwrap(), "alice");
    let client_id = guard.beacon().unwrap().test_get_client_id().unwrap();

    guard.test_reset(Configuration::new(dir.path(), "org.example.test"));
    let beacon = guard.beacon().unwrap();
    assert_eq!(account.test_get_value(beacon, None), None);
    assert_ne!(beacon.test_get_client_id().unwrap(), client_id);
}
