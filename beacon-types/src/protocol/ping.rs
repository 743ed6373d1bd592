use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use super::event::RecordedEvent;

/// The `ping_info` section of a ping.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PingInfo {
    /// The per-ping-name sequence number.
    pub seq: u64,
    /// When the measurement window of this ping started.
    pub start_time: String,
    /// When the measurement window of this ping ended.
    pub end_time: String,
    /// Why the ping was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The `client_info` section of a ping.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ClientInfo {
    /// The client id. Left out for pings that must not be linked to a client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// The operating system name.
    pub os: String,
    /// The operating system version.
    pub os_version: String,
    /// The CPU architecture.
    pub architecture: String,
    /// The build identifier of the application.
    pub app_build: String,
    /// The user visible version of the application.
    pub app_display_version: String,
    /// The release channel of the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_channel: Option<String>,
    /// The version of the telemetry library.
    pub telemetry_sdk_build: String,
    /// The date of the first run, with day resolution.
    pub first_run_date: String,
}

/// A complete ping document.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PingPayload {
    /// Information about this ping.
    pub ping_info: PingInfo,
    /// Information about the client that sent this ping.
    pub client_info: ClientInfo,
    /// The metrics, grouped by kind and keyed by identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
    /// The events, ordered by their relative timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<RecordedEvent>>,
}

impl PingPayload {
    /// Looks up the reported value of a metric by section and identifier.
    pub fn metric(&self, section: &str, identifier: &str) -> Option<&Value> {
        self.metrics.as_ref()?.get(section)?.get(identifier)
    }
}

/// An assembled ping, ready to be uploaded.
///
/// Once created a request is never mutated; it moves into the durable upload
/// queue which owns it until it was delivered or discarded.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PingRequest {
    /// The unique document id, used by the collector for deduplication.
    pub document_id: Uuid,
    /// The name of the ping.
    pub ping_name: String,
    /// The sequence number the ping was assembled with.
    pub seq: u64,
    /// The submission path, relative to the server endpoint.
    pub path: String,
    /// When the ping was assembled.
    pub timestamp: DateTime<Utc>,
    /// The serialized JSON body.
    pub body: String,
    /// The headers to send with the body.
    pub headers: BTreeMap<String, String>,
}

impl PingRequest {
    /// The size of the body in bytes.
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    /// Parses the body back into a document.
    pub fn payload(&self) -> Result<PingPayload, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// The full submission URL against the given endpoint.
    pub fn url(&self, endpoint: &Url) -> Result<Url, url::ParseError> {
        endpoint.join(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_and_payload() {
        let body = r#"{"ping_info":{"seq":3,"start_time":"2020-01-01T00:00+00:00","end_time":"2020-01-02T00:00+00:00"},"client_info":{"os":"linux","os_version":"5","architecture":"x86_64","app_build":"1","app_display_version":"1.0","telemetry_sdk_build":"0.4.0","first_run_date":"2020-01-01+00:00"},"metrics":{"counter":{"a.b":7}}}"#;
        let request = PingRequest {
            document_id: Uuid::nil(),
            ping_name: "metrics".into(),
            seq: 3,
            path: "/submit/app/metrics/1/00000000-0000-0000-0000-000000000000".into(),
            timestamp: Utc::now(),
            body: body.into(),
            headers: BTreeMap::new(),
        };

        let endpoint: Url = "https://collector.example.com".parse().unwrap();
        assert_eq!(
            request.url(&endpoint).unwrap().as_str(),
            "https://collector.example.com/submit/app/metrics/1/00000000-0000-0000-0000-000000000000"
        );

        let payload = request.payload().unwrap();
        assert_eq!(payload.ping_info.seq, 3);
        assert_eq!(payload.client_info.client_id, None);
        assert_eq!(payload.metric("counter", "a.b"), Some(&Value::from(7)));
        assert_eq!(request.body_size(), body.len());
    }
}
