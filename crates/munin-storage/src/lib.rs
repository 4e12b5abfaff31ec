//! Transactional relational storage adapter (spec.md §4.8, C8).
//!
//! The system is single-writer by design (spec.md §1 Non-goals), so a
//! single `Mutex`-guarded connection *is* the concurrency model, not a
//! simplification of it: every writer serializes on `with_tx`, and
//! `spec.md` §5's "select for update on the audit head" invariant
//! falls out for free because the head read and the subsequent insert
//! happen inside the same held lock.

mod schema;

use munin_error::Error;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;

pub use rusqlite;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Opens (creating if absent) the SQLite database at `path` and
    /// runs the idempotent schema migration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::StorageFailure(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::from_connection(conn)
    }

    /// An in-memory database, used by unit and end-to-end tests so
    /// they never touch the filesystem.
    pub fn in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
            .map_err(sql_err)?;
        conn.execute_batch(schema::SCHEMA_SQL).map_err(sql_err)?;
        Ok(Storage {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction: commits on
    /// `Ok`, rolls back (via `Transaction::drop`) on `Err`. No two
    /// concurrent calls can interleave their writes, since the mutex
    /// is held for the duration of `f` — the only I/O inside the
    /// critical section is the local commit itself (spec.md §5).
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("storage mutex poisoned".into()))?;
        let tx = guard
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(sql_err)?;
        let result = f(&tx)?;
        tx.commit().map_err(sql_err)?;
        Ok(result)
    }

    /// Read-only access. Still serialized through the same mutex
    /// (spec.md §1's single-writer model applies to readers too in
    /// this deployment), but takes no write lock semantics.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, Error>) -> Result<T, Error> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| Error::Internal("storage mutex poisoned".into()))?;
        f(&guard)
    }
}

/// Converts a driver error into the workspace taxonomy without
/// leaking the underlying message past the component boundary;
/// callers that need the detail for logging should log it themselves
/// before propagating.
pub fn sql_err(e: rusqlite::Error) -> Error {
    Error::StorageFailure(e.to_string())
}
