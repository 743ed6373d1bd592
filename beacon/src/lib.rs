//! This crate embeds product telemetry into an application: typed metrics
//! are stored locally, assembled into JSON pings and uploaded by a
//! background worker. Nothing here ever panics or returns an error to the
//! instrumented code; misuse is counted as an error metric instead.
//!
//! # Quickstart
//!
//! The most convenient way to use this library is the [`init`] function,
//! which opens the storage under a data directory, starts the upload worker
//! and returns a guard.
//!
//! Dropping the guard shuts the context down: pings marked for shutdown are
//! submitted and queued pings get up to two seconds to be uploaded. Keep the
//! guard around or nothing will be sent.
//!
//! ```
//! use std::collections::BTreeMap;
//!
//! use beacon::metrics::CounterMetric;
//! use beacon::upload::UploadOutcome;
//! use beacon::{ClientInfoMetrics, CommonMetricData, Configuration, Url};
//!
//! struct StdoutUploader;
//!
//! impl beacon::Uploader for StdoutUploader {
//!     fn upload(&self, url: &Url, body: &[u8], _: &BTreeMap<String, String>) -> UploadOutcome {
//!         println!("{} {}", url, String::from_utf8_lossy(body));
//!         UploadOutcome::Success
//!     }
//! }
//!
//! let dir = tempfile::tempdir().unwrap();
//! let guard = beacon::init(
//!     Configuration::new(dir.path(), "org.example.app"),
//!     ClientInfoMetrics::unknown(),
//!     StdoutUploader,
//! );
//!
//! if let Some(beacon) = guard.beacon() {
//!     let opened = CounterMetric::new(CommonMetricData::new("app", "opened", "metrics"));
//!     opened.add(beacon, 1);
//! }
//! guard.submit_ping("metrics", Some("manual"));
//! ```
//!
//! # Transports
//!
//! The crate does not speak HTTP itself. The host passes an [`Uploader`]
//! which performs a single request and classifies the response, usually with
//! [`UploadOutcome::from_http_status`](upload::UploadOutcome::from_http_status).
//! Retries, backoff and rate limiting are handled by the upload manager.
//!
//! # Features
//!
//! * `test`: Enables testing support, see the [`test`] module.

#![warn(missing_docs)]

mod init;
mod worker;

#[cfg(feature = "test")]
pub mod test;

#[doc(inline)]
pub use beacon_core::*;

pub use crate::init::{init, BeaconGuard};
