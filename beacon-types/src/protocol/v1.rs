//! Version 1 of the beacon ping protocol.
//!
//! A ping is a single JSON document with a `ping_info` section, a
//! `client_info` section and the recorded `metrics` and `events`. It is
//! submitted to `/submit/<application_id>/<ping_name>/1/<document_id>`.

pub use super::common::*;
pub use super::event::*;
pub use super::metric::*;
pub use super::ping::*;

/// An arbitrary (JSON) value.
pub mod value {
    pub use serde_json::value::{from_value, to_value, Map, Number, Value};
}

/// An arbitrary (JSON) value.
pub use self::value::Value;

/// The version segment used in submission paths.
pub const SCHEMA_VERSION: u16 = super::LATEST;
