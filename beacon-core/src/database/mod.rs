//! The persistent metric store.
//!
//! All persistent state lives in a single SQLite file: metric values keyed
//! by `(lifetime, storage, metric_id)`, recorded events, small bookkeeping
//! values, per-ping sequence numbers and the pending ping queue. Access goes
//! through one `Mutex<Connection>`, so every operation is serialized and
//! multi-step mutations run inside one transaction via [`Database::write`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::protocol::{CommonMetricData, Lifetime, Metric};
use crate::{beacon_debug, beacon_warn, Error, Result};

pub(crate) mod events;
pub(crate) mod meta;
pub(crate) mod metrics;
mod schema;

pub use self::metrics::StorageSnapshot;

const DATABASE_FILE: &str = "beacon.sqlite";

/// The embedded store backing metrics, events and the upload queue.
pub struct Database {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Opens (or creates) the store inside `data_path`.
    ///
    /// A damaged database file is moved aside and replaced by an empty one;
    /// the data in it is lost, the host keeps running.
    pub fn new(data_path: &Path) -> Result<Self> {
        fs::create_dir_all(data_path)?;
        let path = data_path.join(DATABASE_FILE);

        let conn = match open_and_migrate(&path) {
            Ok(conn) => conn,
            Err(err) if err.is_corruption() => {
                beacon_warn!(
                    "[Database] {} is damaged, starting with an empty store: {}",
                    path.display(),
                    err
                );
                quarantine(&path)?;
                open_and_migrate(&path)?
            }
            Err(err) => return Err(err),
        };

        beacon_debug!("[Database] opened {}", path.display());
        Ok(Database {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Deletes the store inside `data_path`, if there is one.
    ///
    /// Used to start over with empty storage; no `Database` for the path may
    /// be in use afterwards.
    pub fn destroy(data_path: &Path) -> Result<()> {
        let path = data_path.join(DATABASE_FILE);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        remove_sidecars(&path)
    }

    /// The path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a read-only closure against the store.
    pub fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Runs a closure inside a single transaction.
    ///
    /// The transaction commits when the closure returns `Ok` and rolls back
    /// otherwise, so a failed or interrupted mutation leaves the previously
    /// committed state intact.
    pub fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Overwrites the value of a metric in all of its pings.
    pub fn record(&self, data: &CommonMetricData, value: &Metric) -> Result<()> {
        self.write(|tx| metrics::record(tx, data, value))
    }

    /// Accumulates into the value of a metric in all of its pings.
    ///
    /// `transform` receives the current value (if any) of each storage and
    /// returns the new one; read and write happen in one transaction.
    pub fn record_with<F>(&self, data: &CommonMetricData, transform: F) -> Result<()>
    where
        F: FnMut(Option<Metric>) -> Metric,
    {
        self.write(|tx| metrics::record_with(tx, data, transform))
    }

    /// All values stored for a ping, optionally restricted to one lifetime.
    pub fn snapshot(
        &self,
        storage: &str,
        lifetime: Option<Lifetime>,
    ) -> Result<BTreeMap<String, Metric>> {
        self.read(|conn| metrics::snapshot(conn, storage, lifetime).map(|snap| snap.values))
    }

    /// The stored value of one metric in one ping.
    pub fn get_metric(
        &self,
        lifetime: Lifetime,
        storage: &str,
        metric_id: &str,
    ) -> Result<Option<Metric>> {
        self.read(|conn| metrics::get(conn, lifetime, storage, metric_id))
    }

    /// Removes all values of the given lifetime stored for a ping.
    pub fn clear(&self, lifetime: Lifetime, storage: &str) -> Result<()> {
        self.write(|tx| {
            metrics::clear_storage(tx, lifetime, storage)?;
            if lifetime == Lifetime::Ping {
                events::clear_storage(tx, storage)?;
            }
            Ok(())
        })
    }

    /// Removes all values of the given lifetime in every ping.
    pub fn clear_lifetime(&self, lifetime: Lifetime) -> Result<()> {
        self.write(|tx| metrics::clear_lifetime(tx, lifetime).map(|_| ()))
    }
}

fn open_and_migrate(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    schema::apply_pragmas(&conn)?;
    schema::check_integrity(&conn)?;
    schema::run_migrations(&conn)?;
    Ok(conn)
}

fn quarantine(path: &Path) -> Result<()> {
    let mut damaged = path.as_os_str().to_owned();
    damaged.push(".corrupt");
    fs::rename(path, &damaged)?;
    remove_sidecars(path)
}

fn remove_sidecars(path: &Path) -> Result<()> {
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            fs::remove_file(&sidecar)?;
        }
    }
    Ok(())
}

/// A corruption class error, used when an integrity check fails.
pub(crate) fn corruption_error(message: String) -> Error {
    Error::Storage(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
        Some(message),
    ))
}

/// An in-memory connection with the current schema.
#[cfg(test)]
pub(crate) fn schema_for_tests() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory database");
    schema::run_migrations(&conn).expect("migrations");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(name: &str, lifetime: Lifetime) -> CommonMetricData {
        CommonMetricData {
            lifetime,
            ..CommonMetricData::new("test", name, "store1")
        }
    }

    #[test]
    fn test_user_lifetime_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let meta = counter("persistent", Lifetime::User);
        {
            let db = Database::new(dir.path()).unwrap();
            db.record(&meta, &Metric::Counter(1)).unwrap();
            db.record(&meta, &Metric::Counter(42)).unwrap();
        }
        let db = Database::new(dir.path()).unwrap();
        assert_eq!(
            db.get_metric(Lifetime::User, "store1", "test.persistent")
                .unwrap(),
            Some(Metric::Counter(42))
        );
    }

    #[test]
    fn test_record_with_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        let mut meta = counter("clicks", Lifetime::Ping);
        meta.send_in_pings.push("store2".into());

        for _ in 0..3 {
            db.record_with(&meta, |old| match old {
                Some(Metric::Counter(c)) => Metric::Counter(c + 2),
                _ => Metric::Counter(2),
            })
            .unwrap();
        }

        for store in ["store1", "store2"] {
            let snapshot = db.snapshot(store, None).unwrap();
            assert_eq!(snapshot.get("test.clicks"), Some(&Metric::Counter(6)));
        }
    }

    #[test]
    fn test_clear_only_touches_matching_entries() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        db.record(&counter("a", Lifetime::Ping), &Metric::Counter(1))
            .unwrap();
        db.record(&counter("b", Lifetime::User), &Metric::Counter(2))
            .unwrap();
        let mut other = counter("c", Lifetime::Ping);
        other.send_in_pings = vec!["store2".into()];
        db.record(&other, &Metric::Counter(3)).unwrap();

        db.clear(Lifetime::Ping, "store1").unwrap();

        let snapshot = db.snapshot("store1", None).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("test.b"), Some(&Metric::Counter(2)));
        assert_eq!(db.snapshot("store2", None).unwrap().len(), 1);

        db.clear_lifetime(Lifetime::Ping).unwrap();
        assert!(db.snapshot("store2", None).unwrap().is_empty());
        assert_eq!(db.snapshot("store1", None).unwrap().len(), 1);
    }

    #[test]
    fn test_damaged_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DATABASE_FILE), b"definitely not sqlite").unwrap();

        let db = Database::new(dir.path()).unwrap();
        assert!(db.snapshot("store1", None).unwrap().is_empty());
        assert!(dir.path().join("beacon.sqlite.corrupt").exists());
    }
}
