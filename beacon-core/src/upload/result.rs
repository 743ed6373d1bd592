use std::fmt;
use std::str;
use std::time::Duration;

use crate::protocol::PingRequest;

/// The result of one upload attempt, as reported by the host's uploader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The collector accepted the ping.
    Success,
    /// The attempt failed in a way that may succeed later, e.g. a network
    /// error, a 5xx or a 429 response.
    RecoverableFailure {
        /// A `Retry-After` value sent by the collector.
        retry_after: Option<String>,
    },
    /// The collector rejected the ping itself; it will never succeed.
    UnrecoverableFailure,
}

impl UploadOutcome {
    /// A recoverable failure without any server hint, e.g. a network error.
    pub fn recoverable() -> Self {
        UploadOutcome::RecoverableFailure { retry_after: None }
    }

    /// Classifies an HTTP response.
    ///
    /// 2xx is a success, 429 and 5xx are recoverable, any other 4xx is
    /// unrecoverable. Everything else (redirects, informational codes) is
    /// treated as recoverable.
    pub fn from_http_status(status: u16, retry_after: Option<&str>) -> Self {
        match status {
            200..=299 => UploadOutcome::Success,
            429 | 500..=599 => UploadOutcome::RecoverableFailure {
                retry_after: retry_after.map(str::to_owned),
            },
            400..=499 => UploadOutcome::UnrecoverableFailure,
            _ => UploadOutcome::RecoverableFailure {
                retry_after: retry_after.map(str::to_owned),
            },
        }
    }
}

/// The persisted state of a queued ping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting to be handed out, possibly after a backoff deadline.
    Pending,
    /// Handed out to the uploader and awaiting its outcome.
    InFlight,
    /// Delivered; the task is removed from the queue.
    Succeeded,
    /// Dropped without delivery; the task is removed from the queue.
    Discarded,
}

impl TaskState {
    /// The column value used in the queue table.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InFlight => "in_flight",
            TaskState::Succeeded => "succeeded",
            TaskState::Discarded => "discarded",
        }
    }
}

impl str::FromStr for TaskState {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        Ok(match string {
            "pending" => TaskState::Pending,
            "in_flight" => TaskState::InFlight,
            "succeeded" => TaskState::Succeeded,
            "discarded" => TaskState::Discarded,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A queued ping together with its scheduling metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadTask {
    /// The ping to deliver.
    pub request: PingRequest,
    /// Recoverable failures so far.
    pub attempts: u32,
    /// The state at the time the task was read.
    pub state: TaskState,
}

impl UploadTask {
    /// The document id, which also identifies the task.
    pub fn document_id(&self) -> uuid::Uuid {
        self.request.document_id
    }
}

/// What the host's upload loop should do next.
#[derive(Clone, Debug, PartialEq)]
pub enum PingUploadTask {
    /// Upload this ping and report the outcome.
    Upload(UploadTask),
    /// Pings are queued but none may be sent yet; ask again after this time.
    Wait(Duration),
    /// Nothing to upload.
    Done,
}

impl PingUploadTask {
    /// Whether this is an `Upload` task.
    pub fn is_upload(&self) -> bool {
        matches!(self, PingUploadTask::Upload(_))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(200, UploadOutcome::Success)]
    #[case(204, UploadOutcome::Success)]
    #[case(400, UploadOutcome::UnrecoverableFailure)]
    #[case(413, UploadOutcome::UnrecoverableFailure)]
    #[case(429, UploadOutcome::recoverable())]
    #[case(503, UploadOutcome::recoverable())]
    #[case(301, UploadOutcome::recoverable())]
    fn test_http_status(#[case] status: u16, #[case] expected: UploadOutcome) {
        assert_eq!(UploadOutcome::from_http_status(status, None), expected);
    }

    #[test]
    fn test_retry_after_is_kept() {
        assert_eq!(
            UploadOutcome::from_http_status(429, Some("30")),
            UploadOutcome::RecoverableFailure {
                retry_after: Some("30".into())
            }
        );
    }
}
