/// The version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// The ping collecting interval metrics and internal diagnostics.
pub const METRICS_PING_NAME: &str = "metrics";
/// The ping collecting recorded events.
pub const EVENTS_PING_NAME: &str = "events";
/// The ping sent when the user opts out of data collection.
pub const DELETION_REQUEST_PING_NAME: &str = "deletion-request";

/// Client id reported once upload was disabled.
pub const KNOWN_CLIENT_ID: &str = "c0ffeec0-ffee-c0ff-eec0-ffeec0ffeec0";

/// The number of records kept while the store is not initialized.
pub const MAX_PREINIT_QUEUE_SIZE: usize = 100;

lazy_static::lazy_static! {
    pub static ref USER_AGENT: String = format!("Beacon/{} (Rust on {})", VERSION, PLATFORM);
}
