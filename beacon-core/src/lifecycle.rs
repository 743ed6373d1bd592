//! Context states and lifetime boundaries.
//!
//! The lifecycle manager owns two things: the state machine of a
//! [`Beacon`] context (`Uninitialized -> Active -> ShuttingDown`) with the
//! buffer of records made before the store was ready, and the mapping from
//! each metric lifetime to the event that clears it.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;

use crate::constants::MAX_PREINIT_QUEUE_SIZE;
use crate::database::{events, meta, metrics};
use crate::protocol::Lifetime;
use crate::types::Uuid;
use crate::{beacon_debug, Beacon, Result};

/// A deferred record, replayed once the context becomes active.
pub type PreinitTask = Box<dyn FnOnce(&Beacon) + Send>;

/// The state of a [`Beacon`] context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Created, storage not yet opened. Records are buffered.
    Uninitialized,
    /// Recording and submission are accepted.
    Active,
    /// Records are rejected; only the final flush may still assemble pings.
    ShuttingDown,
}

/// What happens to an operation handed to [`LifecycleManager::admit`].
pub enum Admission {
    /// The context is active; run the operation now.
    Run(PreinitTask),
    /// The operation was buffered for replay.
    Buffered,
    /// The operation was dropped.
    Rejected,
}

struct Inner {
    state: State,
    preinit: Vec<PreinitTask>,
    overflowed: u32,
}

/// Tracks the context state and the lifetime clearing triggers.
pub struct LifecycleManager {
    inner: Mutex<Inner>,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("LifecycleManager")
            .field("state", &inner.state)
            .field("preinit", &inner.preinit.len())
            .finish()
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    /// A manager in the `Uninitialized` state.
    pub fn new() -> Self {
        LifecycleManager {
            inner: Mutex::new(Inner {
                state: State::Uninitialized,
                preinit: Vec::new(),
                overflowed: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Decides whether an operation runs now, is buffered or is dropped.
    ///
    /// At most [`MAX_PREINIT_QUEUE_SIZE`] operations are buffered; further
    /// ones are dropped and counted.
    pub fn admit(&self, task: PreinitTask) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            State::Active => Admission::Run(task),
            State::ShuttingDown => Admission::Rejected,
            State::Uninitialized => {
                if inner.preinit.len() >= MAX_PREINIT_QUEUE_SIZE {
                    inner.overflowed = inner.overflowed.saturating_add(1);
                    Admission::Rejected
                } else {
                    inner.preinit.push(task);
                    Admission::Buffered
                }
            }
        }
    }

    /// Moves to `Active` and replays the buffered operations in order.
    ///
    /// The replay happens while the state lock is held, so operations
    /// admitted concurrently run after all buffered ones. Returns the number
    /// of operations that were dropped because the buffer was full.
    pub fn activate(&self, beacon: &Beacon) -> u32 {
        let mut inner = self.lock();
        if inner.state != State::Uninitialized {
            return 0;
        }
        let buffered = std::mem::take(&mut inner.preinit);
        beacon_debug!("[Lifecycle] replaying {} buffered records", buffered.len());
        for task in buffered {
            task(beacon);
        }
        inner.state = State::Active;
        std::mem::take(&mut inner.overflowed)
    }

    /// Moves to `ShuttingDown`. Returns `false` if the context was not active.
    pub fn begin_shutdown(&self) -> bool {
        let mut inner = self.lock();
        let was_active = inner.state == State::Active;
        inner.state = State::ShuttingDown;
        inner.preinit.clear();
        was_active
    }

    /// A ping was collected: its Ping lifetime values and events are cleared.
    pub(crate) fn on_ping_collected(&self, conn: &Connection, ping_name: &str) -> Result<()> {
        metrics::clear_storage(conn, Lifetime::Ping, ping_name)?;
        events::clear_storage(conn, ping_name)?;
        Ok(())
    }

    /// The process started: Application lifetime values of a previous run
    /// are cleared. Returns whether anything was cleared.
    pub(crate) fn on_startup(&self, conn: &Connection, run_id: &Uuid) -> Result<bool> {
        let run_id = run_id.to_string();
        let last_run = meta::get(conn, meta::LAST_RUN_ID)?;
        let new_run = last_run.as_deref() != Some(run_id.as_str());
        if new_run {
            let cleared = metrics::clear_lifetime(conn, Lifetime::Application)?;
            beacon_debug!("[Lifecycle] new run, cleared {} application values", cleared);
            meta::set(conn, meta::LAST_RUN_ID, &run_id)?;
        }
        Ok(new_run)
    }

    /// The user reset their data: User lifetime values, sequence numbers and
    /// client identity are dropped. The caller regenerates the identity.
    pub(crate) fn on_user_reset(&self, conn: &Connection) -> Result<()> {
        metrics::clear_lifetime(conn, Lifetime::User)?;
        meta::clear_sequence_numbers(conn)?;
        meta::remove(conn, meta::CLIENT_ID)?;
        meta::remove(conn, meta::FIRST_RUN_DATE)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema_for_tests;
    use crate::protocol::{CommonMetricData, Metric};

    fn put(conn: &Connection, lifetime: Lifetime, name: &str) {
        let meta = CommonMetricData {
            lifetime,
            ..CommonMetricData::new("test", name, "metrics")
        };
        metrics::record(conn, &meta, &Metric::Boolean(true)).unwrap();
    }

    #[test]
    fn test_startup_clears_application_lifetime_once_per_run() {
        let conn = schema_for_tests();
        let lifecycle = LifecycleManager::new();
        let run = Uuid::new_v4();

        put(&conn, Lifetime::Application, "app");
        put(&conn, Lifetime::User, "user");
        assert!(lifecycle.on_startup(&conn, &run).unwrap());
        put(&conn, Lifetime::Application, "app");
        assert!(!lifecycle.on_startup(&conn, &run).unwrap());

        let snapshot = metrics::snapshot(&conn, "metrics", None).unwrap();
        assert_eq!(snapshot.values.len(), 2);

        assert!(lifecycle.on_startup(&conn, &Uuid::new_v4()).unwrap());
        let snapshot = metrics::snapshot(&conn, "metrics", None).unwrap();
        assert_eq!(snapshot.values.keys().collect::<Vec<_>>(), vec!["test.user"]);
    }

    #[test]
    fn test_user_reset() {
        let conn = schema_for_tests();
        let lifecycle = LifecycleManager::new();
        put(&conn, Lifetime::User, "user");
        put(&conn, Lifetime::Ping, "ping");
        meta::set(&conn, meta::CLIENT_ID, "abc").unwrap();
        meta::next_sequence_number(&conn, "metrics").unwrap();

        lifecycle.on_user_reset(&conn).unwrap();

        let snapshot = metrics::snapshot(&conn, "metrics", None).unwrap();
        assert_eq!(snapshot.values.keys().collect::<Vec<_>>(), vec!["test.ping"]);
        assert_eq!(meta::get(&conn, meta::CLIENT_ID).unwrap(), None);
        assert_eq!(meta::sequence_number(&conn, "metrics").unwrap(), 0);
    }

    #[test]
    fn test_shutdown_rejects() {
        let lifecycle = LifecycleManager::new();
        assert!(matches!(lifecycle.admit(Box::new(|_| {})), Admission::Buffered));
        assert!(!lifecycle.begin_shutdown());
        assert_eq!(lifecycle.state(), State::ShuttingDown);
        assert!(matches!(lifecycle.admit(Box::new(|_| {})), Admission::Rejected));
    }
}
