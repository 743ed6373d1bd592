//! This module exposes the types for the beacon ping protocol in different versions.

pub mod v1;

mod common;
mod event;
mod metric;
mod ping;

/// The latest version of the protocol.
pub const LATEST: u16 = 1;

/// The always latest beacon protocol version.
pub mod latest {
    pub use super::v1::*;
}
