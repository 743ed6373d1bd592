//! The durable pending ping queue.
//!
//! Rows are ordered by `position`, which only grows, so the queue is a
//! global FIFO across ping types. Deletion-request pings live in their own
//! partition (`deletion_request = 1`) that is neither bounded nor purged.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::result::{TaskState, UploadTask};
use crate::protocol::PingRequest;
use crate::types::Uuid;
use crate::{beacon_warn, Result};

/// The partition a queued ping lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Partition {
    Regular,
    DeletionRequest,
}

impl Partition {
    fn as_sql(self) -> i64 {
        match self {
            Partition::Regular => 0,
            Partition::DeletionRequest => 1,
        }
    }
}

const SELECT_TASK: &str = "SELECT document_id, request, state, attempts FROM pending_pings";

/// Decodes a row; unreadable rows yield their document id instead.
fn decode(row: &Row<'_>) -> rusqlite::Result<Result<UploadTask, String>> {
    let document_id: String = row.get(0)?;
    let request: String = row.get(1)?;
    let state: String = row.get(2)?;
    let attempts: i64 = row.get(3)?;

    let request = match serde_json::from_str::<PingRequest>(&request) {
        Ok(request) => request,
        Err(_) => return Ok(Err(document_id)),
    };
    let state = match state.parse::<TaskState>() {
        Ok(state) => state,
        Err(()) => return Ok(Err(document_id)),
    };
    Ok(Ok(UploadTask {
        request,
        attempts: attempts.max(0) as u32,
        state,
    }))
}

fn drop_unreadable(conn: &Connection, document_id: &str) -> Result<()> {
    beacon_warn!("[UploadManager] dropping unreadable queued ping {}", document_id);
    conn.execute(
        "DELETE FROM pending_pings WHERE document_id = ?1",
        params![document_id],
    )?;
    Ok(())
}

pub(crate) fn contains(conn: &Connection, document_id: &Uuid) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT position FROM pending_pings WHERE document_id = ?1",
            params![document_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Appends a ping as `Pending`. Returns `false` if the document id is
/// already queued.
pub(crate) fn insert(conn: &Connection, request: &PingRequest, partition: Partition) -> Result<bool> {
    let encoded = serde_json::to_string(request)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pending_pings
            (document_id, ping_name, deletion_request, request, body_size, state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            request.document_id.to_string(),
            request.ping_name,
            partition.as_sql(),
            encoded,
            request.body_size() as i64,
            TaskState::Pending.as_str(),
        ],
    )?;
    Ok(inserted == 1)
}

pub(crate) fn get(conn: &Connection, document_id: &Uuid) -> Result<Option<UploadTask>> {
    let sql = format!("{} WHERE document_id = ?1", SELECT_TASK);
    let row = conn
        .query_row(&sql, params![document_id.to_string()], decode)
        .optional()?;
    match row {
        Some(Ok(task)) => Ok(Some(task)),
        Some(Err(id)) => {
            drop_unreadable(conn, &id)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

/// The oldest pending task of a partition that is eligible at `now_ms`.
pub(crate) fn next_eligible(
    conn: &Connection,
    partition: Partition,
    now_ms: i64,
) -> Result<Option<UploadTask>> {
    let sql = format!(
        "{} WHERE deletion_request = ?1 AND state = ?2 AND next_attempt_at <= ?3
         ORDER BY position LIMIT 1",
        SELECT_TASK
    );
    loop {
        let row = conn
            .query_row(
                &sql,
                params![partition.as_sql(), TaskState::Pending.as_str(), now_ms],
                decode,
            )
            .optional()?;
        match row {
            Some(Ok(task)) => return Ok(Some(task)),
            Some(Err(id)) => drop_unreadable(conn, &id)?,
            None => return Ok(None),
        }
    }
}

/// The earliest backoff deadline among pending tasks of both partitions.
pub(crate) fn earliest_deadline(conn: &Connection) -> Result<Option<i64>> {
    Ok(conn.query_row(
        "SELECT MIN(next_attempt_at) FROM pending_pings WHERE state = ?1",
        params![TaskState::Pending.as_str()],
        |row| row.get(0),
    )?)
}

/// When the oldest in-flight task was handed out.
pub(crate) fn earliest_in_flight(conn: &Connection) -> Result<Option<i64>> {
    Ok(conn.query_row(
        "SELECT MIN(in_flight_since) FROM pending_pings WHERE state = ?1",
        params![TaskState::InFlight.as_str()],
        |row| row.get(0),
    )?)
}

pub(crate) fn mark_in_flight(conn: &Connection, document_id: &Uuid, now_ms: i64) -> Result<()> {
    conn.execute(
        "UPDATE pending_pings SET state = ?2, in_flight_since = ?3 WHERE document_id = ?1",
        params![document_id.to_string(), TaskState::InFlight.as_str(), now_ms],
    )?;
    Ok(())
}

/// Returns a task to `Pending` with a new attempt count and deadline.
pub(crate) fn reschedule(
    conn: &Connection,
    document_id: &Uuid,
    attempts: u32,
    next_attempt_at: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE pending_pings
         SET state = ?2, attempts = ?3, next_attempt_at = ?4, in_flight_since = NULL
         WHERE document_id = ?1",
        params![
            document_id.to_string(),
            TaskState::Pending.as_str(),
            attempts,
            next_attempt_at
        ],
    )?;
    Ok(())
}

/// Reverts in-flight tasks to `Pending`.
///
/// With `started_before` only tasks handed out before that time are
/// reverted (inclusive); without it all of them are.
pub(crate) fn revert_in_flight(conn: &Connection, started_before: Option<i64>) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE pending_pings SET state = ?1, in_flight_since = NULL
         WHERE state = ?2 AND (?3 IS NULL OR in_flight_since IS NULL OR in_flight_since <= ?3)",
        params![
            TaskState::Pending.as_str(),
            TaskState::InFlight.as_str(),
            started_before
        ],
    )?)
}

pub(crate) fn remove(conn: &Connection, document_id: &Uuid) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM pending_pings WHERE document_id = ?1",
        params![document_id.to_string()],
    )?;
    Ok(removed > 0)
}

/// Drops every task of a partition.
pub(crate) fn purge(conn: &Connection, partition: Partition) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM pending_pings WHERE deletion_request = ?1",
        params![partition.as_sql()],
    )?)
}

/// Number of tasks and their total body size in a partition.
pub(crate) fn usage(conn: &Connection, partition: Partition) -> Result<(usize, u64)> {
    let (count, bytes): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(body_size), 0) FROM pending_pings WHERE deletion_request = ?1",
        params![partition.as_sql()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((count.max(0) as usize, bytes.max(0) as u64))
}

/// Evicts the oldest pending regular tasks until the partition fits the
/// bounds. `keep` is never evicted. Returns the number of evicted tasks.
pub(crate) fn evict_overflow(
    conn: &Connection,
    max_count: usize,
    max_bytes: u64,
    keep: &Uuid,
) -> Result<usize> {
    let keep = keep.to_string();
    let mut evicted = 0;
    loop {
        let (count, bytes) = usage(conn, Partition::Regular)?;
        if count <= max_count && bytes <= max_bytes {
            break;
        }
        let oldest: Option<String> = conn
            .query_row(
                "SELECT document_id FROM pending_pings
                 WHERE deletion_request = 0 AND state = ?1 AND document_id != ?2
                 ORDER BY position LIMIT 1",
                params![TaskState::Pending.as_str(), keep],
                |row| row.get(0),
            )
            .optional()?;
        match oldest {
            Some(id) => {
                conn.execute(
                    "DELETE FROM pending_pings WHERE document_id = ?1",
                    params![id],
                )?;
                evicted += 1;
            }
            None => break,
        }
    }
    Ok(evicted)
}

/// The tasks of a partition in queue order.
pub(crate) fn tasks(conn: &Connection, partition: Partition) -> Result<Vec<UploadTask>> {
    let sql = format!("{} WHERE deletion_request = ?1 ORDER BY position", SELECT_TASK);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![partition.as_sql()], decode)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows.into_iter().filter_map(|row| row.ok()).collect())
}
