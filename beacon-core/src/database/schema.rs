//! Connection setup and table layout.

use rusqlite::Connection;

use super::corruption_error;
use crate::Result;

/// The schema version this build writes, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

pub(super) fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = FULL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    Ok(())
}

/// Fails with a corruption error unless `PRAGMA quick_check` reports `ok`.
pub(super) fn check_integrity(conn: &Connection) -> Result<()> {
    let result: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if result != "ok" {
        return Err(corruption_error(format!("quick_check failed: {}", result)));
    }
    Ok(())
}

pub(super) fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS metrics (
            lifetime    TEXT NOT NULL,
            storage     TEXT NOT NULL,
            metric_id   TEXT NOT NULL,
            value       TEXT NOT NULL,
            PRIMARY KEY (lifetime, storage, metric_id)
        );

        CREATE INDEX IF NOT EXISTS idx_metrics_storage
            ON metrics(storage, lifetime);

        CREATE TABLE IF NOT EXISTS events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            storage     TEXT NOT NULL,
            timestamp   INTEGER NOT NULL,
            payload     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_storage
            ON events(storage, id);

        CREATE TABLE IF NOT EXISTS meta (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sequence_numbers (
            ping_name   TEXT PRIMARY KEY,
            seq         INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_pings (
            position            INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id         TEXT NOT NULL UNIQUE,
            ping_name           TEXT NOT NULL,
            deletion_request    INTEGER NOT NULL DEFAULT 0,
            request             TEXT NOT NULL,
            body_size           INTEGER NOT NULL,
            state               TEXT NOT NULL DEFAULT 'pending',
            attempts            INTEGER NOT NULL DEFAULT 0,
            next_attempt_at     INTEGER NOT NULL DEFAULT 0,
            in_flight_since     INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_pending_pings_state
            ON pending_pings(deletion_request, state, position);

        COMMIT;
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('metrics', 'events', 'meta', 'sequence_numbers', 'pending_pings')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn test_fresh_database_passes_check() {
        let conn = Connection::open_in_memory().unwrap();
        check_integrity(&conn).unwrap();
    }
}
