//! Decides when pings are assembled.
//!
//! Three triggers lead to an assembly: an explicit submission, an interval
//! schedule that ran out and the shutdown hook. The scheduler also
//! coalesces submissions: while an earlier ping of the same type is still
//! queued, a further request does not assemble another one. The data stays
//! in storage and goes out with the next ping after the queued one left.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use rusqlite::Connection;

use crate::database::meta;
use crate::ping::PingType;
use crate::types::Uuid;
use crate::upload::queue;
use crate::{beacon_debug, Result};

/// Tracks outstanding pings and interval schedules.
#[derive(Debug, Default)]
pub struct Scheduler {
    outstanding: Mutex<HashMap<String, Uuid>>,
}

impl Scheduler {
    /// Creates a scheduler without outstanding pings.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Uuid>> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a new ping of this type may be assembled now.
    ///
    /// An outstanding document id is released once its task left the queue.
    pub(crate) fn should_assemble(&self, conn: &Connection, ping_name: &str) -> Result<bool> {
        let mut outstanding = self.lock();
        if let Some(document_id) = outstanding.get(ping_name) {
            if queue::contains(conn, document_id)? {
                beacon_debug!(
                    "[Scheduler] {} ping {} is still queued, coalescing",
                    ping_name,
                    document_id
                );
                return Ok(false);
            }
            outstanding.remove(ping_name);
        }
        Ok(true)
    }

    /// Remembers the document id of a freshly queued ping.
    pub(crate) fn mark_outstanding(&self, ping_name: &str, document_id: Uuid) {
        self.lock().insert(ping_name.to_owned(), document_id);
    }

    /// Forgets all outstanding pings, e.g. after the queue was purged.
    pub(crate) fn reset(&self) {
        self.lock().clear();
    }

    /// The interval pings that are due at `now`.
    ///
    /// Due pings get `now` as their new last-sent time, whether or not they
    /// end up being sent. A ping seen for the first time starts its schedule
    /// at `now`. Also returns the time until the next ping becomes due.
    pub(crate) fn due_pings(
        &self,
        conn: &Connection,
        pings: &[PingType],
        now: DateTime<FixedOffset>,
    ) -> Result<(Vec<String>, Option<Duration>)> {
        let mut due = Vec::new();
        let mut next: Option<Duration> = None;
        let stamp = now.to_rfc3339();

        for ping in pings {
            let interval = match ping.interval {
                Some(interval) => interval,
                None => continue,
            };
            let key = meta::last_sent_key(&ping.name);
            let last_sent = meta::get(conn, &key)?
                .and_then(|value| DateTime::parse_from_rfc3339(&value).ok());

            let remaining = match last_sent {
                Some(last_sent) => match (now - last_sent).to_std() {
                    Ok(elapsed) if elapsed >= interval => {
                        due.push(ping.name.clone());
                        meta::set(conn, &key, &stamp)?;
                        interval
                    }
                    Ok(elapsed) => interval - elapsed,
                    // the clock went backwards, restart the schedule
                    Err(_) => {
                        meta::set(conn, &key, &stamp)?;
                        interval
                    }
                },
                None => {
                    meta::set(conn, &key, &stamp)?;
                    interval
                }
            };
            next = Some(next.map_or(remaining, |next| next.min(remaining)));
        }

        Ok((due, next))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::database::schema_for_tests;

    fn at(hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, hour, 0, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn test_interval_schedule() {
        let conn = schema_for_tests();
        let scheduler = Scheduler::new();
        let pings = vec![
            PingType::new("metrics", true, false).with_interval(Duration::from_secs(4 * 3600)),
            PingType::new("custom", true, false),
        ];

        let (due, next) = scheduler.due_pings(&conn, &pings, at(0)).unwrap();
        assert!(due.is_empty());
        assert_eq!(next, Some(Duration::from_secs(4 * 3600)));

        let (due, next) = scheduler.due_pings(&conn, &pings, at(3)).unwrap();
        assert!(due.is_empty());
        assert_eq!(next, Some(Duration::from_secs(3600)));

        let (due, _) = scheduler.due_pings(&conn, &pings, at(5)).unwrap();
        assert_eq!(due, vec!["metrics".to_owned()]);
        let (due, _) = scheduler.due_pings(&conn, &pings, at(6)).unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn test_coalescing_releases_after_dequeue() {
        let conn = schema_for_tests();
        let scheduler = Scheduler::new();
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO pending_pings (document_id, ping_name, request, body_size)
             VALUES (?1, 'metrics', '{}', 2)",
            [id.to_string()],
        )
        .unwrap();

        assert!(scheduler.should_assemble(&conn, "metrics").unwrap());
        scheduler.mark_outstanding("metrics", id);
        assert!(!scheduler.should_assemble(&conn, "metrics").unwrap());
        assert!(scheduler.should_assemble(&conn, "events").unwrap());

        queue::remove(&conn, &id).unwrap();
        assert!(scheduler.should_assemble(&conn, "metrics").unwrap());
    }
}
