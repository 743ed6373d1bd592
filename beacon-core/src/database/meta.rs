//! Small bookkeeping values and per-ping sequence numbers.

use rusqlite::{params, Connection, OptionalExtension};

use crate::Result;

pub(crate) const CLIENT_ID: &str = "client_id";
pub(crate) const FIRST_RUN_DATE: &str = "first_run_date";
pub(crate) const LAST_RUN_ID: &str = "last_run_id";

/// The key under which the start of a ping's measurement window is kept.
pub(crate) fn start_time_key(ping_name: &str) -> String {
    format!("start_time:{}", ping_name)
}

/// The key under which the last submission time of a ping is kept.
pub(crate) fn last_sent_key(ping_name: &str) -> String {
    format!("last_sent:{}", ping_name)
}

pub(crate) fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn remove(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
    Ok(())
}

/// The next sequence number of a ping. Returns the current value and
/// stores its successor.
pub(crate) fn next_sequence_number(conn: &Connection, ping_name: &str) -> Result<u64> {
    let current = sequence_number(conn, ping_name)?;
    conn.execute(
        "INSERT INTO sequence_numbers (ping_name, seq) VALUES (?1, ?2)
         ON CONFLICT(ping_name) DO UPDATE SET seq = excluded.seq",
        params![ping_name, (current + 1) as i64],
    )?;
    Ok(current)
}

/// The sequence number the next ping of that name will get.
pub(crate) fn sequence_number(conn: &Connection, ping_name: &str) -> Result<u64> {
    let seq: Option<i64> = conn
        .query_row(
            "SELECT seq FROM sequence_numbers WHERE ping_name = ?1",
            params![ping_name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(seq.map_or(0, |seq| seq.max(0) as u64))
}

pub(crate) fn clear_sequence_numbers(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM sequence_numbers", [])?;
    Ok(())
}
