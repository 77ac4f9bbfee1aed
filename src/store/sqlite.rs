// ABOUTME: SQLite-backed session store: one table of sleep sessions behind a connection lock.
// ABOUTME: Provides insert, update, point and ordered lookups, and atomic clear.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::record::{RecordId, SessionRecord};
use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sleep_sessions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time_ms INTEGER NOT NULL,
    end_time_ms   INTEGER NOT NULL,
    quality       INTEGER NOT NULL DEFAULT -1
);";

const SELECT_COLUMNS: &str = "SELECT id, start_time_ms, end_time_ms, quality FROM sleep_sessions";

/// Durable storage of session records.
///
/// All access goes through a single connection guarded by a mutex, so readers
/// never observe a half-applied write.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open or create the session database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %db_path.display(), journal_mode = %mode, "opened session database");
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a statement half-applied,
        // so a poisoned connection is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a new record and return the identifier assigned to it.
    pub fn insert(&self, record: &SessionRecord) -> Result<RecordId> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sleep_sessions (start_time_ms, end_time_ms, quality) VALUES (?1, ?2, ?3)",
            params![record.start_time_ms, record.end_time_ms, record.quality],
        )?;
        Ok(RecordId(conn.last_insert_rowid()))
    }

    /// Replace the stored record with the same id.
    pub fn update(&self, record: &SessionRecord) -> Result<()> {
        let Some(id) = record.id else {
            return Err(Error::NotFound(RecordId(0)));
        };
        let changed = self.lock().execute(
            "UPDATE sleep_sessions SET start_time_ms = ?1, end_time_ms = ?2, quality = ?3 WHERE id = ?4",
            params![record.start_time_ms, record.end_time_ms, record.quality, id.0],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    pub fn get_by_id(&self, id: RecordId) -> Result<Option<SessionRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.0],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// The record with the greatest id, if any.
    pub fn get_latest(&self) -> Result<Option<SessionRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT 1"),
                [],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Every record, newest first. Each call re-reads the table.
    pub fn get_all_descending(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC"))?;
        let rows = stmt.query_map([], record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 =
            self.lock()
                .query_row("SELECT COUNT(*) FROM sleep_sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove every record in one statement.
    pub fn clear(&self) -> Result<()> {
        self.lock().execute("DELETE FROM sleep_sessions", [])?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_conn_for_test<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.lock())
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: Some(RecordId(row.get(0)?)),
        start_time_ms: row.get(1)?,
        end_time_ms: row.get(2)?,
        quality: row.get(3)?,
    })
}
