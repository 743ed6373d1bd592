//! Metric values, keyed by lifetime, storage and identifier.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::protocol::{CommonMetricData, Lifetime, Metric};
use crate::{beacon_warn, Result};

/// The values of one storage, plus the entries that could not be decoded.
#[derive(Debug, Default)]
pub struct StorageSnapshot {
    /// Decoded values keyed by identifier.
    pub values: BTreeMap<String, Metric>,
    /// Identifiers whose stored value was unreadable; they have been removed.
    pub undecodable: Vec<String>,
}

pub(crate) fn get(
    conn: &Connection,
    lifetime: Lifetime,
    storage: &str,
    metric_id: &str,
) -> Result<Option<Metric>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM metrics WHERE lifetime = ?1 AND storage = ?2 AND metric_id = ?3",
            params![lifetime.as_str(), storage, metric_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(metric) => Ok(Some(metric)),
            Err(err) => {
                beacon_warn!("[Database] dropping unreadable value of {}: {}", metric_id, err);
                remove(conn, lifetime, storage, metric_id)?;
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub(crate) fn put(
    conn: &Connection,
    lifetime: Lifetime,
    storage: &str,
    metric_id: &str,
    value: &Metric,
) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO metrics (lifetime, storage, metric_id, value) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(lifetime, storage, metric_id) DO UPDATE SET value = excluded.value",
        params![lifetime.as_str(), storage, metric_id, encoded],
    )?;
    Ok(())
}

pub(crate) fn remove(
    conn: &Connection,
    lifetime: Lifetime,
    storage: &str,
    metric_id: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM metrics WHERE lifetime = ?1 AND storage = ?2 AND metric_id = ?3",
        params![lifetime.as_str(), storage, metric_id],
    )?;
    Ok(())
}

/// Writes `value` into every storage of the metric.
pub(crate) fn record(conn: &Connection, data: &CommonMetricData, value: &Metric) -> Result<()> {
    let id = data.identifier();
    for storage in data.storage_names() {
        put(conn, data.lifetime, storage, &id, value)?;
    }
    Ok(())
}

/// Replaces the value in every storage of the metric by `transform(old)`.
pub(crate) fn record_with<F>(conn: &Connection, data: &CommonMetricData, mut transform: F) -> Result<()>
where
    F: FnMut(Option<Metric>) -> Metric,
{
    let id = data.identifier();
    for storage in data.storage_names() {
        let old = get(conn, data.lifetime, storage, &id)?;
        put(conn, data.lifetime, storage, &id, &transform(old))?;
    }
    Ok(())
}

/// Reads all values of one storage.
///
/// Values that fail to decode are deleted and reported in
/// [`StorageSnapshot::undecodable`] instead of failing the whole read.
pub(crate) fn snapshot(
    conn: &Connection,
    storage: &str,
    lifetime: Option<Lifetime>,
) -> Result<StorageSnapshot> {
    let mut stmt = conn.prepare(
        "SELECT lifetime, metric_id, value FROM metrics
         WHERE storage = ?1 AND (?2 IS NULL OR lifetime = ?2)
         ORDER BY metric_id",
    )?;
    let rows = stmt.query_map(params![storage, lifetime.map(Lifetime::as_str)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut snapshot = StorageSnapshot::default();
    let mut broken = Vec::new();
    for row in rows {
        let (stored_lifetime, metric_id, raw) = row?;
        match serde_json::from_str::<Metric>(&raw) {
            Ok(metric) => {
                snapshot.values.insert(metric_id, metric);
            }
            Err(err) => {
                beacon_warn!("[Database] dropping unreadable value of {}: {}", metric_id, err);
                broken.push((stored_lifetime, metric_id));
            }
        }
    }
    drop(stmt);

    for (stored_lifetime, metric_id) in broken {
        conn.execute(
            "DELETE FROM metrics WHERE lifetime = ?1 AND storage = ?2 AND metric_id = ?3",
            params![stored_lifetime, storage, metric_id],
        )?;
        snapshot.undecodable.push(metric_id);
    }
    Ok(snapshot)
}

/// The distinct labels recorded for a labeled metric in one storage.
pub(crate) fn labels_of(
    conn: &Connection,
    lifetime: Lifetime,
    storage: &str,
    base_id: &str,
) -> Result<Vec<String>> {
    let prefix = format!("{}/", base_id);
    let mut stmt = conn.prepare(
        "SELECT metric_id FROM metrics
         WHERE lifetime = ?1 AND storage = ?2 AND substr(metric_id, 1, length(?3)) = ?3",
    )?;
    let labels = stmt
        .query_map(params![lifetime.as_str(), storage, prefix], |row| {
            row.get::<_, String>(0)
        })?
        .filter_map(|row| match row {
            Ok(id) => id.get(prefix.len()..).map(str::to_owned).map(Ok),
            Err(err) => Some(Err(err)),
        })
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(labels)
}

pub(crate) fn clear_storage(conn: &Connection, lifetime: Lifetime, storage: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM metrics WHERE lifetime = ?1 AND storage = ?2",
        params![lifetime.as_str(), storage],
    )?)
}

pub(crate) fn clear_lifetime(conn: &Connection, lifetime: Lifetime) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM metrics WHERE lifetime = ?1",
        params![lifetime.as_str()],
    )?)
}

pub(crate) fn clear_all(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM metrics", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_lifetime_filter() {
        let conn = conn();
        put(&conn, Lifetime::Ping, "metrics", "a.ping", &Metric::Boolean(true)).unwrap();
        put(&conn, Lifetime::User, "metrics", "a.user", &Metric::Quantity(7)).unwrap();

        let all = snapshot(&conn, "metrics", None).unwrap();
        assert_eq!(all.values.len(), 2);
        let user = snapshot(&conn, "metrics", Some(Lifetime::User)).unwrap();
        assert_eq!(user.values.keys().collect::<Vec<_>>(), vec!["a.user"]);
    }

    #[test]
    fn test_undecodable_values_are_dropped() {
        let conn = conn();
        put(&conn, Lifetime::Ping, "metrics", "a.good", &Metric::Counter(1)).unwrap();
        conn.execute(
            "INSERT INTO metrics (lifetime, storage, metric_id, value) VALUES ('ping', 'metrics', 'a.bad', '{nope')",
            [],
        )
        .unwrap();

        let snap = snapshot(&conn, "metrics", None).unwrap();
        assert_eq!(snap.values.len(), 1);
        assert_eq!(snap.undecodable, vec!["a.bad".to_owned()]);
        assert!(get(&conn, Lifetime::Ping, "metrics", "a.bad").unwrap().is_none());
    }

    #[test]
    fn test_labels_of() {
        let conn = conn();
        for label in ["left", "right"] {
            let id = format!("ui.clicks/{}", label);
            put(&conn, Lifetime::Ping, "metrics", &id, &Metric::Counter(1)).unwrap();
        }
        put(&conn, Lifetime::Ping, "metrics", "ui.clicks_total", &Metric::Counter(1)).unwrap();

        let mut labels = labels_of(&conn, Lifetime::Ping, "metrics", "ui.clicks").unwrap();
        labels.sort();
        assert_eq!(labels, vec!["left", "right"]);
    }
}
