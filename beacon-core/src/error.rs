use std::io;

use thiserror::Error;

/// A specialized `Result` for beacon operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised inside the core.
///
/// Only initialization and the `test_*` introspection functions hand these
/// to the caller. Everything on the recording and submission paths absorbs
/// them, logs them and, where possible, counts them in an error metric.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The embedded database failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    /// A stored value or a ping document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Creating the data directory failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The store was used before `initialize` opened it.
    #[error("beacon is not initialized")]
    NotInitialized,
    /// The context is shutting down and rejects the operation.
    #[error("beacon is shutting down")]
    ShuttingDown,
    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    /// Whether the error means the database file itself is damaged.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Storage(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            ),
            _ => false,
        }
    }
}
