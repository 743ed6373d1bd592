//! Recorded events, kept in recording order per storage.

use rusqlite::{params, Connection};

use crate::protocol::RecordedEvent;
use crate::{beacon_warn, Result};

/// Appends an event to every given storage.
///
/// Returns the storages that hold at least `max_events` events afterwards.
pub(crate) fn record(
    conn: &Connection,
    storages: &[String],
    event: &RecordedEvent,
    max_events: usize,
) -> Result<Vec<String>> {
    let payload = serde_json::to_string(event)?;
    let mut full = Vec::new();
    for storage in storages {
        conn.execute(
            "INSERT INTO events (storage, timestamp, payload) VALUES (?1, ?2, ?3)",
            params![storage, event.timestamp as i64, payload],
        )?;
        if count(conn, storage)? >= max_events {
            full.push(storage.clone());
        }
    }
    Ok(full)
}

pub(crate) fn count(conn: &Connection, storage: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE storage = ?1",
        params![storage],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// The events of one storage in recording order.
///
/// Returns the decoded events and the number of undecodable rows, which are
/// deleted.
pub(crate) fn snapshot(conn: &Connection, storage: &str) -> Result<(Vec<RecordedEvent>, usize)> {
    let mut stmt =
        conn.prepare("SELECT id, payload FROM events WHERE storage = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![storage], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut events = Vec::new();
    let mut broken = Vec::new();
    for row in rows {
        let (id, payload) = row?;
        match serde_json::from_str::<RecordedEvent>(&payload) {
            Ok(event) => events.push(event),
            Err(err) => {
                beacon_warn!("[Database] dropping unreadable event in {}: {}", storage, err);
                broken.push(id);
            }
        }
    }
    drop(stmt);

    for id in &broken {
        conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
    }
    Ok((events, broken.len()))
}

/// The storages that currently hold events.
pub(crate) fn storages(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT storage FROM events ORDER BY storage")?;
    let storages = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(storages)
}

pub(crate) fn clear_storage(conn: &Connection, storage: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM events WHERE storage = ?1", params![storage])?)
}

pub(crate) fn clear_all(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM events", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema;

    fn event(timestamp: u64, name: &str) -> RecordedEvent {
        RecordedEvent {
            timestamp,
            category: "ui".into(),
            name: name.into(),
            extra: None,
        }
    }

    #[test]
    fn test_record_reports_full_storages() {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();
        let stores = vec!["events".to_owned(), "other".to_owned()];

        assert!(record(&conn, &stores, &event(1, "a"), 2).unwrap().is_empty());
        conn.execute(
            "INSERT INTO events (storage, timestamp, payload) VALUES ('other', 0, 'garbage')",
            [],
        )
        .unwrap();
        let full = record(&conn, &stores, &event(2, "b"), 2).unwrap();
        assert_eq!(full, vec!["events".to_owned(), "other".to_owned()]);

        let (events, broken) = snapshot(&conn, "other").unwrap();
        assert_eq!(broken, 1);
        assert_eq!(
            events.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(count(&conn, "other").unwrap(), 2);
        assert_eq!(storages(&conn).unwrap(), stores);
    }
}
