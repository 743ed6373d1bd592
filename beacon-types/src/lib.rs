//! This crate provides common types for working with the beacon ping protocol.
//!
//! It is used by `beacon-core` to describe metrics, their lifetimes and the
//! documents ("pings") that are assembled from them, and can be used by
//! anything that needs to read or produce those documents, for instance a
//! test collector.
//!
//! Most types live in the [`protocol`] module; the latest version of the
//! protocol is always re-exported as `protocol::latest`.

#![warn(missing_docs)]

mod utils;

pub mod protocol;

pub use crate::utils::{format_datetime, local_now_with_offset, truncate_string_at_boundary};

pub use url::Url;
pub use uuid::Uuid;

/// Generates a random v4 UUID, used for document ids and client ids.
pub fn random_uuid() -> Uuid {
    Uuid::new_v4()
}
