//! Ping types and their assembly.

use std::time::Duration;

use crate::Beacon;

mod assembler;

pub use self::assembler::PingAssembler;

/// The reason attached to pings submitted by the interval scheduler.
pub const REASON_SCHEDULED: &str = "scheduled";
/// The reason attached to pings submitted while shutting down.
pub const REASON_SHUTDOWN: &str = "shutdown";
/// The reason attached to pings submitted because a buffer is full.
pub const REASON_MAX_CAPACITY: &str = "max_capacity";
/// The reason attached to pings carrying data left over from a previous run.
pub const REASON_STARTUP: &str = "startup";
/// The reason attached to the deletion-request ping.
pub const REASON_UPLOAD_DISABLED: &str = "upload_disabled";

/// The description of a ping.
///
/// A ping type is registered with the [`Beacon`] context once; metrics name
/// it in their `send_in_pings`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PingType {
    /// The name of the ping, also its storage namespace.
    pub name: String,
    /// Whether `client_info` carries the client id.
    pub include_client_id: bool,
    /// Whether the ping is assembled even without any data.
    pub send_if_empty: bool,
    /// Whether the ping is submitted when the context shuts down.
    pub submit_on_shutdown: bool,
    /// The schedule of the ping, if the scheduler should submit it.
    pub interval: Option<Duration>,
}

impl PingType {
    /// Creates a ping type that is only submitted on request.
    pub fn new<N: Into<String>>(name: N, include_client_id: bool, send_if_empty: bool) -> Self {
        PingType {
            name: name.into(),
            include_client_id,
            send_if_empty,
            submit_on_shutdown: false,
            interval: None,
        }
    }

    /// Submits this ping whenever `interval` passed since it was last sent.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Submits this ping when the context shuts down.
    pub fn with_submit_on_shutdown(mut self) -> Self {
        self.submit_on_shutdown = true;
        self
    }

    /// Requests assembly and upload of this ping.
    ///
    /// Assembly happens immediately when the context is active and is
    /// buffered before initialization. Repeated requests coalesce while an
    /// earlier ping of the same type is still queued.
    pub fn submit(&self, beacon: &Beacon, reason: Option<&str>) {
        beacon.submit_ping(self, reason);
    }
}
