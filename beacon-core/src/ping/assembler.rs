use std::collections::BTreeMap;
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::Connection;
use serde_json::{Map, Value};

use super::PingType;
use crate::constants::VERSION;
use crate::database::{events, meta, metrics};
use crate::error_recording::record_error_in;
use crate::protocol::{
    normalize_event_timestamps, ClientInfo, ErrorType, Metric, PingInfo, PingPayload,
    PingRequest, TimeUnit, SCHEMA_VERSION,
};
use crate::types::{format_datetime, Uuid};
use crate::{beacon_debug, Beacon, Result};

/// Turns the stored data of a ping into a [`PingRequest`].
///
/// Assembly runs inside the caller's transaction: the snapshot, the
/// sequence number increment, the clearing of collected data and the
/// queue insert commit together or not at all.
#[derive(Debug, Default)]
pub struct PingAssembler;

impl PingAssembler {
    /// Creates an assembler.
    pub fn new() -> Self {
        PingAssembler
    }

    /// Assembles a ping and clears the data it collected.
    ///
    /// Returns `None` when the ping has no data and is not sent if empty;
    /// nothing is changed in that case.
    pub(crate) fn collect(
        &self,
        beacon: &Beacon,
        conn: &Connection,
        ping: &PingType,
        reason: Option<&str>,
        document_id: Uuid,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<PingRequest>> {
        let mut snapshot = metrics::snapshot(conn, &ping.name, None)?;
        if !snapshot.undecodable.is_empty() {
            let pings = [ping.name.clone()];
            for identifier in &snapshot.undecodable {
                let base = identifier.split('/').next().unwrap_or(identifier);
                record_error_in(conn, base, &pings, ErrorType::InvalidValue, 1)?;
            }
            snapshot = metrics::snapshot(conn, &ping.name, None)?;
        }
        let (mut recorded_events, _) = events::snapshot(conn, &ping.name)?;

        if snapshot.values.is_empty() && recorded_events.is_empty() && !ping.send_if_empty {
            beacon_debug!("[PingAssembler] {} ping is empty, not sending", ping.name);
            return Ok(None);
        }

        let seq = meta::next_sequence_number(conn, &ping.name)?;
        let start_key = meta::start_time_key(&ping.name);
        let start_time = match meta::get(conn, &start_key)? {
            Some(start_time) => start_time,
            None => format_datetime(&beacon.start_time(), TimeUnit::Minute),
        };
        let end_time = format_datetime(&now, TimeUnit::Minute);
        meta::set(conn, &start_key, &end_time)?;

        let info = beacon.client_info_provider().client_info();
        let client_id = if ping.include_client_id {
            meta::get(conn, meta::CLIENT_ID)?
        } else {
            None
        };
        let client_info = ClientInfo {
            client_id,
            os: info.os,
            os_version: info.os_version,
            architecture: info.architecture,
            app_build: info.app_build,
            app_display_version: info.app_display_version,
            app_channel: beacon.configuration().app_channel.clone(),
            telemetry_sdk_build: VERSION.to_owned(),
            first_run_date: meta::get(conn, meta::FIRST_RUN_DATE)?.unwrap_or_default(),
        };

        normalize_event_timestamps(&mut recorded_events);
        let payload = PingPayload {
            ping_info: PingInfo {
                seq,
                start_time,
                end_time,
                reason: reason.map(str::to_owned),
            },
            client_info,
            metrics: if snapshot.values.is_empty() {
                None
            } else {
                Some(metrics_section(&snapshot.values))
            },
            events: if recorded_events.is_empty() {
                None
            } else {
                Some(recorded_events)
            },
        };
        let body = serde_json::to_string(&payload)?;

        let config = beacon.configuration();
        if config.log_pings {
            log::info!(target: "beacon", "{} ping {}:\n{}", ping.name, document_id, body);
        }

        let mut headers = BTreeMap::new();
        headers.insert(
            "Content-Type".to_owned(),
            "application/json; charset=utf-8".to_owned(),
        );
        headers.insert(
            "Date".to_owned(),
            httpdate::fmt_http_date(SystemTime::from(now)),
        );
        headers.insert("X-Telemetry-Agent".to_owned(), config.user_agent.to_string());
        if let Some(ref tag) = config.debug_view_tag {
            headers.insert("X-Debug-ID".to_owned(), tag.clone());
        }

        let path = format!(
            "/submit/{}/{}/{}/{}",
            sanitize_application_id(&config.application_id),
            ping.name,
            SCHEMA_VERSION,
            document_id
        );

        beacon.lifecycle().on_ping_collected(conn, &ping.name)?;
        beacon_debug!(
            "[PingAssembler] assembled {} ping {} (seq {})",
            ping.name,
            document_id,
            seq
        );

        Ok(Some(PingRequest {
            document_id,
            ping_name: ping.name.clone(),
            seq,
            path,
            timestamp: now.with_timezone(&Utc),
            body,
            headers,
        }))
    }
}

/// Groups stored values by kind, nesting labeled values under their metric.
fn metrics_section(values: &BTreeMap<String, Metric>) -> Map<String, Value> {
    let mut sections = Map::new();
    for (identifier, metric) in values {
        let (section, key, label) = match identifier.split_once('/') {
            Some((base, label)) => (
                format!("labeled_{}", metric.ping_section()),
                base,
                Some(label),
            ),
            None => (metric.ping_section().to_owned(), identifier.as_str(), None),
        };
        let section = sections
            .entry(section)
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(section) = section.as_object_mut() else {
            continue;
        };
        match label {
            Some(label) => {
                let labeled = section
                    .entry(key.to_owned())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(labeled) = labeled.as_object_mut() {
                    labeled.insert(label.to_owned(), metric.as_json());
                }
            }
            None => {
                section.insert(key.to_owned(), metric.as_json());
            }
        }
    }
    sections
}

/// Lowercases the application id and replaces anything but ASCII
/// alphanumerics with single dashes, so it is usable as a path segment.
pub(crate) fn sanitize_application_id(application_id: &str) -> String {
    let mut sanitized = String::with_capacity(application_id.len());
    let mut last_dash = false;
    for c in application_id.chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            sanitized.push('-');
            last_dash = true;
        }
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_metrics_are_grouped_by_kind() {
        let mut values = BTreeMap::new();
        values.insert("ui.clicks".to_owned(), Metric::Counter(3));
        values.insert("ui.errors/net".to_owned(), Metric::Counter(1));
        values.insert("ui.errors/disk".to_owned(), Metric::Counter(2));
        values.insert(
            "app.load".to_owned(),
            Metric::Timespan(Duration::from_millis(20), TimeUnit::Millisecond),
        );

        assert_eq!(
            Value::Object(metrics_section(&values)),
            json!({
                "counter": {"ui.clicks": 3},
                "labeled_counter": {"ui.errors": {"net": 1, "disk": 2}},
                "timespan": {"app.load": {"value": 20, "time_unit": "millisecond"}},
            })
        );
    }

    #[test]
    fn test_sanitize_application_id() {
        assert_eq!(sanitize_application_id("org.Example_App"), "org-example-app");
        assert_eq!(sanitize_application_id("a..b"), "a-b");
    }
}
