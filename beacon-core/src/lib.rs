//! This crate provides the core of the beacon telemetry library: local
//! metric storage, ping assembly and the upload manager.
//!
//! `beacon-core` is meant for authors of platform bindings and integrations.
//! Applications usually use the [`beacon`] crate instead, which adds a
//! background upload worker driving an injected [`Uploader`].
//!
//! # Core Concepts
//!
//! Everything hangs off an explicitly constructed [`Beacon`] context. Metric
//! handles such as [`metrics::CounterMetric`] record values into its
//! storage, keyed by [`protocol::Lifetime`]. Values are grouped into pings,
//! described by a [`PingType`]; when a ping is submitted its data is
//! assembled into a [`protocol::PingRequest`] and placed in a durable upload
//! queue.
//!
//! The network is never touched by the core. The host polls
//! [`Beacon::get_upload_task`], performs the upload however it likes and
//! reports back with [`Beacon::process_upload_response`]:
//!
//! ```
//! use beacon_core::metrics::CounterMetric;
//! use beacon_core::protocol::CommonMetricData;
//! use beacon_core::upload::{PingUploadTask, UploadOutcome};
//! use beacon_core::{Beacon, ClientInfoMetrics, Configuration};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let beacon = Beacon::new(
//!     Configuration::new(dir.path(), "org.example.app"),
//!     ClientInfoMetrics::unknown(),
//! )
//! .unwrap();
//! beacon.initialize().unwrap();
//!
//! let clicks = CounterMetric::new(CommonMetricData::new("ui", "clicks", "metrics"));
//! clicks.add(&beacon, 1);
//! beacon.submit_ping_by_name("metrics", None);
//!
//! if let PingUploadTask::Upload(task) = beacon.get_upload_task() {
//!     // upload `task.request` here
//!     beacon.process_upload_response(&task.request.document_id, UploadOutcome::Success);
//! }
//! ```
//!
//! # Failure Model
//!
//! Recording and submission never fail towards the application. Storage
//! errors are logged on the `beacon` log target, misuse of a metric is
//! counted in the `beacon.error.*` metrics. Only [`Beacon::initialize`] and
//! the `test_*` introspection functions return errors.
//!
//! [`beacon`]: https://crates.io/crates/beacon

#![warn(missing_docs)]

// macros; these need to be first to be used by other modules
#[macro_use]
mod macros;

mod client_info;
mod configuration;
mod constants;
mod core;
mod database;
mod error;
mod error_recording;
mod internal_metrics;
mod lifecycle;
mod scheduler;
mod uploader;

pub mod metrics;
pub mod ping;
pub mod upload;

// public api or exports from this crate
pub use crate::client_info::{ClientInfoMetrics, ClientInfoProvider};
pub use crate::configuration::{Configuration, DEFAULT_SERVER_ENDPOINT};
pub use crate::constants::{
    DELETION_REQUEST_PING_NAME, EVENTS_PING_NAME, KNOWN_CLIENT_ID, METRICS_PING_NAME, USER_AGENT,
    VERSION,
};
pub use crate::core::Beacon;
pub use crate::database::{Database, StorageSnapshot};
pub use crate::error::{Error, Result};
pub use crate::error_recording::test_get_num_recorded_errors;
pub use crate::lifecycle::{LifecycleManager, State};
pub use crate::ping::{PingAssembler, PingType};
pub use crate::scheduler::Scheduler;
pub use crate::uploader::Uploader;

// public api from other crates
#[doc(inline)]
pub use beacon_types as types;
pub use beacon_types::protocol::latest as protocol;
pub use beacon_types::protocol::latest::{CommonMetricData, ErrorType, Lifetime, Metric, TimeUnit};
pub use url::Url;
