//! Queueing, pacing and retrying of ping uploads.
//!
//! The manager owns the durable queue of assembled pings and answers the
//! host's upload loop through a pull protocol: the loop asks for the next
//! task with [`UploadManager::get_upload_task`], performs the request with
//! its [`Uploader`](crate::Uploader) and reports the outcome through
//! [`UploadManager::process_upload_response`].
//!
//! Every queue mutation runs inside one database transaction, so a crash
//! between handing a task out and recording its outcome leaves the task
//! `InFlight`; such tasks are reverted to `Pending` on the next start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::database::Database;
use crate::internal_metrics;
use crate::protocol::PingRequest;
use crate::types::Uuid;
use crate::{beacon_debug, beacon_warn, debug_assert_or_log, Result};

mod policy;
pub(crate) mod queue;
mod ratelimit;
mod result;

pub use self::policy::{BackoffPolicy, Policy, RateLimitPolicy};
pub(crate) use self::queue::Partition;
pub use self::ratelimit::{RateLimiter, RateLimiterState};
pub use self::result::{PingUploadTask, TaskState, UploadOutcome, UploadTask};

/// Milliseconds since the unix epoch, the clock used for queue deadlines.
pub(crate) fn unix_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|since| i64::try_from(since.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// What happened to a ping handed to [`UploadManager::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The ping was queued; `evicted` older pings made room for it.
    Queued {
        /// The number of evicted pings.
        evicted: usize,
    },
    /// A ping with the same document id is already queued.
    Duplicate,
    /// The body exceeds the configured maximum size.
    TooLarge,
}

/// The durable upload queue and its pacing state.
#[derive(Debug)]
pub struct UploadManager {
    policy: Policy,
    rate_limiter: Mutex<RateLimiter>,
    diagnostics_enabled: AtomicBool,
}

impl UploadManager {
    /// Creates a manager applying `policy`.
    pub fn new(policy: Policy) -> Self {
        let rate_limiter = RateLimiter::new(policy.rate_limit.clone());
        UploadManager {
            policy,
            rate_limiter: Mutex::new(rate_limiter),
            diagnostics_enabled: AtomicBool::new(true),
        }
    }

    /// The policy in effect.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.rate_limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Turns the recording of the `beacon.upload.*` counters on or off.
    ///
    /// They are off while upload is disabled, like every other metric.
    pub(crate) fn set_diagnostics_enabled(&self, enabled: bool) {
        self.diagnostics_enabled.store(enabled, Ordering::SeqCst);
    }

    fn count(&self, conn: &Connection, meta: &crate::protocol::CommonMetricData, amount: i32) {
        if amount <= 0 || !self.diagnostics_enabled.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = internal_metrics::add_to_counter(conn, meta, amount) {
            beacon_warn!("[UploadManager] failed to record {}: {}", meta.identifier(), err);
        }
    }

    /// Reverts every `InFlight` task to `Pending`.
    ///
    /// Called at startup: a task that was in flight when the process died is
    /// treated as failed, never as delivered.
    pub fn revert_in_flight(&self, db: &Database) -> Result<usize> {
        let reverted = db.write(|tx| queue::revert_in_flight(tx, None))?;
        if reverted > 0 {
            beacon_debug!("[UploadManager] {} in-flight pings are pending again", reverted);
        }
        Ok(reverted)
    }

    /// Durably appends a ping to the regular queue.
    pub fn enqueue(&self, db: &Database, request: &PingRequest) -> Result<EnqueueOutcome> {
        db.write(|tx| self.enqueue_in(tx, request, Partition::Regular))
    }

    /// Appends a ping inside an open transaction.
    ///
    /// Oversized pings are dropped; duplicates are ignored; older pending
    /// pings are evicted when the regular partition exceeds its bounds.
    pub(crate) fn enqueue_in(
        &self,
        conn: &Connection,
        request: &PingRequest,
        partition: Partition,
    ) -> Result<EnqueueOutcome> {
        if request.body_size() > self.policy.max_ping_body_size {
            beacon_warn!(
                "[UploadManager] discarding {} ping {}: body of {} bytes exceeds {}",
                request.ping_name,
                request.document_id,
                request.body_size(),
                self.policy.max_ping_body_size
            );
            self.count(conn, &internal_metrics::discarded_exceeding_pings_size(), 1);
            return Ok(EnqueueOutcome::TooLarge);
        }

        if !queue::insert(conn, request, partition)? {
            beacon_debug!(
                "[UploadManager] {} is already queued, ignoring",
                request.document_id
            );
            return Ok(EnqueueOutcome::Duplicate);
        }

        let evicted = match partition {
            Partition::Regular => queue::evict_overflow(
                conn,
                self.policy.max_pending_pings_count,
                self.policy.max_pending_pings_bytes,
                &request.document_id,
            )?,
            Partition::DeletionRequest => 0,
        };
        if evicted > 0 {
            beacon_warn!("[UploadManager] evicted {} pending pings", evicted);
            self.count(
                conn,
                &internal_metrics::pending_pings_evicted(),
                i32::try_from(evicted).unwrap_or(i32::MAX),
            );
        }

        beacon_debug!(
            "[UploadManager] enqueued {} ping {}",
            request.ping_name,
            request.document_id
        );
        Ok(EnqueueOutcome::Queued { evicted })
    }

    /// The next thing the upload loop should do.
    ///
    /// Deletion-request pings are served before all others; otherwise the
    /// oldest eligible task wins regardless of its ping type. The returned
    /// task is `InFlight` until its outcome is reported. While only in-flight
    /// tasks remain the loop is told to wait until they can be reverted;
    /// `Done` means the queue is empty. Storage failures are logged and
    /// reported as `Done`.
    pub fn get_upload_task(&self, db: &Database) -> PingUploadTask {
        match self.get_upload_task_at(db, SystemTime::now(), Instant::now()) {
            Ok(task) => task,
            Err(err) => {
                beacon_warn!("[UploadManager] failed to read the queue: {}", err);
                PingUploadTask::Done
            }
        }
    }

    pub(crate) fn get_upload_task_at(
        &self,
        db: &Database,
        now: SystemTime,
        instant: Instant,
    ) -> Result<PingUploadTask> {
        let now_ms = unix_millis(now);
        let timeout_ms = i64::try_from(self.policy.in_flight_timeout.as_millis()).unwrap_or(i64::MAX);

        db.write(|tx| {
            let abandoned = queue::revert_in_flight(tx, Some(now_ms.saturating_sub(timeout_ms)))?;
            if abandoned > 0 {
                beacon_warn!(
                    "[UploadManager] {} pings were in flight for too long, retrying",
                    abandoned
                );
            }

            let candidate = match queue::next_eligible(tx, Partition::DeletionRequest, now_ms)? {
                Some(task) => Some(task),
                None => queue::next_eligible(tx, Partition::Regular, now_ms)?,
            };

            let candidate = match candidate {
                Some(candidate) => candidate,
                None => {
                    // in-flight tasks keep the loop alive until the watchdog can revert them
                    let watchdog = queue::earliest_in_flight(tx)?
                        .map(|since| since.saturating_add(timeout_ms));
                    let deadline = match (queue::earliest_deadline(tx)?, watchdog) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                    return Ok(match deadline {
                        Some(deadline) => {
                            let wait = deadline.saturating_sub(now_ms).max(0) as u64;
                            PingUploadTask::Wait(Duration::from_millis(wait))
                        }
                        None => PingUploadTask::Done,
                    });
                }
            };

            match self.limiter().try_acquire(instant) {
                RateLimiterState::Throttled(remaining) => {
                    beacon_debug!("[UploadManager] throttled for {:?}", remaining);
                    return Ok(PingUploadTask::Wait(remaining));
                }
                RateLimiterState::Incrementing => {}
            }

            let mut task = candidate;
            debug_assert_or_log!(
                task.state == TaskState::Pending,
                "handing out {} in state {}",
                task.document_id(),
                task.state
            );
            queue::mark_in_flight(tx, &task.document_id(), now_ms)?;
            task.state = TaskState::InFlight;
            beacon_debug!(
                "[UploadManager] handing out {} ping {} (attempt {})",
                task.request.ping_name,
                task.document_id(),
                task.attempts + 1
            );
            Ok(PingUploadTask::Upload(task))
        })
    }

    /// Applies the outcome of an upload attempt.
    ///
    /// Reporting an outcome for a task that is no longer queued is a no-op,
    /// so a repeated report neither double counts nor fails. Failures are
    /// only applied to tasks that are actually in flight.
    pub fn process_upload_response(&self, db: &Database, document_id: &Uuid, outcome: UploadOutcome) {
        if let Err(err) = self.process_upload_response_at(db, document_id, outcome, SystemTime::now()) {
            beacon_warn!(
                "[UploadManager] failed to record upload outcome for {}: {}",
                document_id,
                err
            );
        }
    }

    pub(crate) fn process_upload_response_at(
        &self,
        db: &Database,
        document_id: &Uuid,
        outcome: UploadOutcome,
        now: SystemTime,
    ) -> Result<()> {
        db.write(|tx| {
            let task = match queue::get(tx, document_id)? {
                Some(task) => task,
                None => {
                    beacon_debug!("[UploadManager] {} is no longer queued", document_id);
                    return Ok(());
                }
            };

            match outcome {
                UploadOutcome::Success => {
                    queue::remove(tx, document_id)?;
                    beacon_debug!(
                        "[UploadManager] delivered {} ping {}",
                        task.request.ping_name,
                        document_id
                    );
                }
                _ if task.state != TaskState::InFlight => {
                    beacon_debug!(
                        "[UploadManager] ignoring failure for {} in state {}",
                        document_id,
                        task.state
                    );
                }
                UploadOutcome::UnrecoverableFailure => {
                    queue::remove(tx, document_id)?;
                    self.count(tx, &internal_metrics::ping_upload_failure("unrecoverable"), 1);
                    beacon_warn!(
                        "[UploadManager] discarding {} ping {}: rejected by the collector",
                        task.request.ping_name,
                        document_id
                    );
                }
                UploadOutcome::RecoverableFailure { retry_after } => {
                    if let Some(ref retry_after) = retry_after {
                        self.limiter().update_from_retry_after(retry_after);
                    }
                    self.count(tx, &internal_metrics::ping_upload_failure("recoverable"), 1);

                    let attempts = task.attempts.saturating_add(1);
                    if attempts > self.policy.max_recoverable_failures {
                        queue::remove(tx, document_id)?;
                        self.count(tx, &internal_metrics::ping_upload_failure("max_retries"), 1);
                        beacon_warn!(
                            "[UploadManager] discarding {} ping {} after {} failed attempts",
                            task.request.ping_name,
                            document_id,
                            attempts
                        );
                    } else {
                        let delay = self.policy.backoff.delay(attempts, &mut rand::rng());
                        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                        let next_attempt_at = unix_millis(now).saturating_add(delay_ms);
                        queue::reschedule(tx, document_id, attempts, next_attempt_at)?;
                        beacon_debug!(
                            "[UploadManager] retrying {} in {:?} (attempt {})",
                            document_id,
                            delay,
                            attempts
                        );
                    }
                }
            }
            Ok(())
        })
    }

    /// Drops every regular queued ping, keeping deletion-requests.
    pub(crate) fn purge_in(&self, conn: &Connection) -> Result<usize> {
        let purged = queue::purge(conn, Partition::Regular)?;
        self.limiter().reset();
        beacon_debug!("[UploadManager] purged {} pending pings", purged);
        Ok(purged)
    }

    /// The document ids of queued regular pings, oldest first.
    pub fn test_get_queued_document_ids(&self, db: &Database) -> Result<Vec<Uuid>> {
        let tasks = db.read(|conn| queue::tasks(conn, Partition::Regular))?;
        Ok(tasks.iter().map(UploadTask::document_id).collect())
    }

    /// The queued pings of a partition, oldest first.
    pub(crate) fn queued_requests(&self, db: &Database, partition: Partition) -> Result<Vec<PingRequest>> {
        let tasks = db.read(|conn| queue::tasks(conn, partition))?;
        Ok(tasks.into_iter().map(|task| task.request).collect())
    }

    /// The number of queued regular pings.
    pub fn pending_count(&self, db: &Database) -> Result<usize> {
        db.read(|conn| queue::usage(conn, Partition::Regular).map(|(count, _)| count))
    }

    /// The number of queued deletion-request pings.
    pub fn pending_deletion_requests(&self, db: &Database) -> Result<usize> {
        db.read(|conn| queue::usage(conn, Partition::DeletionRequest).map(|(count, _)| count))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;

    fn request(ping_name: &str, seq: u64) -> PingRequest {
        let document_id = Uuid::new_v4();
        PingRequest {
            document_id,
            ping_name: ping_name.into(),
            seq,
            path: format!("/submit/app/{}/1/{}", ping_name, document_id),
            timestamp: Utc::now(),
            body: "{}".into(),
            headers: BTreeMap::new(),
        }
    }

    fn fast_policy() -> Policy {
        Policy {
            backoff: BackoffPolicy {
                base: Duration::ZERO,
                ..Default::default()
            },
            rate_limit: RateLimitPolicy {
                max_tasks: 1000,
                interval: Duration::from_secs(60),
            },
            ..Default::default()
        }
    }

    fn upload_id(task: PingUploadTask) -> Uuid {
        match task {
            PingUploadTask::Upload(task) => task.document_id(),
            other => panic!("expected an upload, got {:?}", other),
        }
    }

    #[test]
    fn test_failures_before_success_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(fast_policy());
        let ping = request("metrics", 0);
        manager.enqueue(&db, &ping).unwrap();

        let id = upload_id(manager.get_upload_task(&db));
        manager.process_upload_response(&db, &id, UploadOutcome::recoverable());
        let id = upload_id(manager.get_upload_task(&db));
        manager.process_upload_response(&db, &id, UploadOutcome::Success);

        assert_eq!(manager.get_upload_task(&db), PingUploadTask::Done);
    }

    #[test]
    fn test_unrecoverable_discards_and_repeats_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(fast_policy());
        let ping = request("metrics", 0);
        manager.enqueue(&db, &ping).unwrap();

        let id = upload_id(manager.get_upload_task(&db));
        manager.process_upload_response(&db, &id, UploadOutcome::UnrecoverableFailure);
        manager.process_upload_response(&db, &id, UploadOutcome::UnrecoverableFailure);
        manager.process_upload_response(&db, &id, UploadOutcome::Success);

        assert_eq!(manager.get_upload_task(&db), PingUploadTask::Done);
        let failures = db
            .get_metric(
                crate::protocol::Lifetime::Ping,
                "metrics",
                "beacon.upload.ping_upload_failure/unrecoverable",
            )
            .unwrap();
        assert_eq!(failures, Some(crate::protocol::Metric::Counter(1)));
    }

    #[test]
    fn test_failure_for_pending_task_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(fast_policy());
        let ping = request("metrics", 0);
        manager.enqueue(&db, &ping).unwrap();

        manager.process_upload_response(&db, &ping.document_id, UploadOutcome::UnrecoverableFailure);
        assert_eq!(upload_id(manager.get_upload_task(&db)), ping.document_id);
    }

    #[test]
    fn test_backoff_makes_the_loop_wait() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(Policy {
            backoff: BackoffPolicy {
                base: Duration::from_secs(10),
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        });
        manager.enqueue(&db, &request("metrics", 0)).unwrap();

        let now = SystemTime::now();
        let id = upload_id(manager.get_upload_task_at(&db, now, Instant::now()).unwrap());
        manager
            .process_upload_response_at(&db, &id, UploadOutcome::recoverable(), now)
            .unwrap();

        match manager.get_upload_task_at(&db, now, Instant::now()).unwrap() {
            PingUploadTask::Wait(wait) => assert_eq!(wait, Duration::from_secs(10)),
            other => panic!("expected to wait, got {:?}", other),
        }
        let later = now + Duration::from_secs(11);
        assert_eq!(
            upload_id(manager.get_upload_task_at(&db, later, Instant::now()).unwrap()),
            id
        );
    }

    #[test]
    fn test_rate_limit_is_shared_across_pings() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(Policy {
            rate_limit: RateLimitPolicy {
                max_tasks: 2,
                interval: Duration::from_secs(60),
            },
            ..Default::default()
        });
        for name in ["metrics", "events", "custom"] {
            manager.enqueue(&db, &request(name, 0)).unwrap();
        }
        let start = Instant::now();
        let now = SystemTime::now();
        assert!(manager.get_upload_task_at(&db, now, start).unwrap().is_upload());
        assert!(manager.get_upload_task_at(&db, now, start).unwrap().is_upload());
        assert!(matches!(
            manager.get_upload_task_at(&db, now, start).unwrap(),
            PingUploadTask::Wait(_)
        ));
    }

    #[test]
    fn test_watchdog_hands_out_abandoned_tasks_again() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(Policy {
            in_flight_timeout: Duration::from_secs(30),
            ..fast_policy()
        });
        let ping = request("metrics", 0);
        manager.enqueue(&db, &ping).unwrap();

        let now = SystemTime::now();
        let start = Instant::now();
        upload_id(manager.get_upload_task_at(&db, now, start).unwrap());
        assert_eq!(
            manager.get_upload_task_at(&db, now, start).unwrap(),
            PingUploadTask::Wait(Duration::from_secs(30))
        );
        assert_eq!(
            manager
                .get_upload_task_at(&db, now + Duration::from_secs(10), start)
                .unwrap(),
            PingUploadTask::Wait(Duration::from_secs(20))
        );
        let later = now + Duration::from_secs(31);
        assert_eq!(
            upload_id(manager.get_upload_task_at(&db, later, start).unwrap()),
            ping.document_id
        );
    }

    #[test]
    fn test_huge_retry_after_throttles_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(fast_policy());
        manager.enqueue(&db, &request("metrics", 0)).unwrap();
        manager.enqueue(&db, &request("events", 0)).unwrap();

        let id = upload_id(manager.get_upload_task(&db));
        manager.process_upload_response(
            &db,
            &id,
            UploadOutcome::from_http_status(503, Some("1e30")),
        );

        match manager.get_upload_task(&db) {
            PingUploadTask::Wait(wait) => assert!(wait <= Duration::from_secs(24 * 60 * 60)),
            other => panic!("expected to wait, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_pings_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(Policy {
            max_ping_body_size: 4,
            ..Default::default()
        });
        let mut ping = request("metrics", 0);
        ping.body = "{\"too\":\"big\"}".into();
        assert_eq!(manager.enqueue(&db, &ping).unwrap(), EnqueueOutcome::TooLarge);
        assert_eq!(manager.pending_count(&db).unwrap(), 0);
    }

    #[test]
    fn test_consecutive_backoffs_grow_up_to_the_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let manager = UploadManager::new(Policy {
            max_recoverable_failures: 10,
            backoff: BackoffPolicy {
                base: Duration::from_secs(1),
                multiplier: 2.0,
                ceiling: Duration::from_secs(4),
                jitter: 0.0,
            },
            ..fast_policy()
        });
        manager.enqueue(&db, &request("metrics", 0)).unwrap();

        let start = Instant::now();
        let mut now = SystemTime::now();
        let mut waits = Vec::new();
        for _ in 0..5 {
            let id = upload_id(manager.get_upload_task_at(&db, now, start).unwrap());
            manager
                .process_upload_response_at(&db, &id, UploadOutcome::recoverable(), now)
                .unwrap();
            match manager.get_upload_task_at(&db, now, start).unwrap() {
                PingUploadTask::Wait(wait) => {
                    waits.push(wait.as_secs());
                    now += wait;
                }
                other => panic!("expected to wait, got {:?}", other),
            }
        }
        assert_eq!(waits, vec![1, 2, 4, 4, 4]);
    }
}
