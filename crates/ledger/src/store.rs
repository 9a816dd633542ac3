use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::error::{JournalError, JournalResult};
use super::record::{JournalRecord, JournalStatus};

const DEFAULT_PRIORITY: i64 = 5;

/// A durable, WAL-journaled task log backed by an embedded SQLite database.
///
/// All operations serialize through an internal mutex: the database itself
/// already serializes writers, but keeping the lock here lets us make
/// multi-statement operations (like `dequeue`) atomic without relying on
/// SQLite's own busy-retry behavior under concurrent connections.
pub struct JournalStore {
    conn: Mutex<Connection>,
}

impl JournalStore {
    /// Open (creating if needed) the journal database at `path`.
    pub fn open(path: impl AsRef<Path>) -> JournalResult<Self> {
        let path = path.as_ref();
        debug!(?path, "JournalStore::open: called");
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_data TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);
            CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);",
        )?;

        info!(?path, "JournalStore opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> JournalResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_data TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX idx_tasks_status ON tasks(status);
            CREATE INDEX idx_tasks_priority ON tasks(priority);
            CREATE INDEX idx_tasks_created_at ON tasks(created_at);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Insert a new pending row, returning its id.
    pub fn enqueue(&self, task_data: serde_json::Value, priority: Option<i64>) -> JournalResult<i64> {
        let priority = priority.unwrap_or(DEFAULT_PRIORITY);
        let now = Utc::now();
        debug!(priority, "JournalStore::enqueue: called");
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (task_data, status, priority, retry_count, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, NULL, ?4, ?4)",
            params![
                task_data.to_string(),
                JournalStatus::Pending.as_str(),
                priority,
                now.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, "JournalStore::enqueue: inserted");
        Ok(id)
    }

    /// Atomically pick the lowest-priority, oldest pending row, mark it
    /// `processing`, and return it. `None` if nothing is pending.
    pub fn dequeue(&self) -> JournalResult<Option<JournalRecord>> {
        debug!("JournalStore::dequeue: called");
        let conn = self.conn.lock().unwrap();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let picked: Option<i64> = conn
            .query_row(
                "SELECT id FROM tasks WHERE status = ?1 ORDER BY priority ASC, created_at ASC LIMIT 1",
                params![JournalStatus::Pending.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = picked else {
            conn.execute("COMMIT", [])?;
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![JournalStatus::Processing.as_str(), now, id],
        )?;

        let record = Self::fetch_row(&conn, id)?;
        conn.execute("COMMIT", [])?;
        debug!(id, "JournalStore::dequeue: claimed row");
        Ok(record)
    }

    /// Marks a row `processing`, used by callers (e.g. the concurrent
    /// queue's persistence wrapper) that pick work from their own in-memory
    /// structure rather than through [`Self::dequeue`].
    pub fn mark_processing(&self, id: i64) -> JournalResult<()> {
        debug!(id, "JournalStore::mark_processing: called");
        self.set_status(id, JournalStatus::Processing, None)
    }

    pub fn mark_completed(&self, id: i64) -> JournalResult<()> {
        debug!(id, "JournalStore::mark_completed: called");
        self.set_status(id, JournalStatus::Completed, None)
    }

    pub fn mark_failed(&self, id: i64, error: &str) -> JournalResult<()> {
        debug!(id, error, "JournalStore::mark_failed: called");
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE tasks SET status = ?1, error = ?2, retry_count = retry_count + 1, updated_at = ?3 WHERE id = ?4",
            params![JournalStatus::Failed.as_str(), error, now, id],
        )?;
        if changed == 0 {
            return Err(JournalError::NotFound(id));
        }
        Ok(())
    }

    /// Move a `failed` row back to `pending`. Rejects any other current status.
    pub fn requeue(&self, id: i64) -> JournalResult<()> {
        debug!(id, "JournalStore::requeue: called");
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row("SELECT status FROM tasks WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        let Some(current) = current else {
            return Err(JournalError::NotFound(id));
        };
        if current != JournalStatus::Failed.as_str() {
            return Err(JournalError::NotFailed(id));
        }
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![JournalStatus::Pending.as_str(), now, id],
        )?;
        Ok(())
    }

    /// Revert any row stuck in `processing` for longer than `timeout` back to `pending`.
    pub fn recover_stale(&self, timeout: Duration) -> JournalResult<usize> {
        debug!(?timeout, "JournalStore::recover_stale: called");
        let cutoff = (Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default()).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let count = conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2
             WHERE status = ?3 AND updated_at < ?4",
            params![
                JournalStatus::Pending.as_str(),
                now,
                JournalStatus::Processing.as_str(),
                cutoff
            ],
        )?;
        if count > 0 {
            info!(count, "JournalStore::recover_stale: reverted stale processing rows");
        }
        Ok(count)
    }

    /// Delete terminal (completed/failed) rows older than `age`.
    pub fn cleanup(&self, age: Duration) -> JournalResult<usize> {
        debug!(?age, "JournalStore::cleanup: called");
        let cutoff = (Utc::now() - chrono::Duration::from_std(age).unwrap_or_default()).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM tasks WHERE status IN (?1, ?2) AND updated_at < ?3",
            params![JournalStatus::Completed.as_str(), JournalStatus::Failed.as_str(), cutoff],
        )?;
        Ok(count)
    }

    pub fn get_by_id(&self, id: i64) -> JournalResult<Option<JournalRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::fetch_row(&conn, id)
    }

    pub fn get_by_status(&self, status: JournalStatus) -> JournalResult<Vec<JournalRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, task_data, status, priority, retry_count, error, created_at, updated_at
             FROM tasks WHERE status = ?1 ORDER BY priority ASC, created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![status.as_str()], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect::<JournalResult<Vec<_>>>()
    }

    pub fn get_recent(&self, limit: usize) -> JournalResult<Vec<JournalRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, task_data, status, priority, retry_count, error, created_at, updated_at
             FROM tasks ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect::<JournalResult<Vec<_>>>()
    }

    pub fn status_summary(&self) -> JournalResult<HashMap<String, usize>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?;
        let mut map = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            map.insert(status, count);
        }
        Ok(map)
    }

    fn set_status(&self, id: i64, status: JournalStatus, error: Option<&str>) -> JournalResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE tasks SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), error, now, id],
        )?;
        if changed == 0 {
            return Err(JournalError::NotFound(id));
        }
        Ok(())
    }

    fn fetch_row(conn: &Connection, id: i64) -> JournalResult<Option<JournalRecord>> {
        conn.query_row(
            "SELECT id, task_data, status, priority, retry_count, error, created_at, updated_at
             FROM tasks WHERE id = ?1",
            params![id],
            Self::row_to_record,
        )
        .optional()?
        .transpose()
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<JournalResult<JournalRecord>> {
        let id: i64 = row.get(0)?;
        let task_data_raw: String = row.get(1)?;
        let status_raw: String = row.get(2)?;
        let priority: i64 = row.get(3)?;
        let retry_count: i64 = row.get(4)?;
        let error: Option<String> = row.get(5)?;
        let created_at_raw: String = row.get(6)?;
        let updated_at_raw: String = row.get(7)?;

        let parsed = (|| -> JournalResult<JournalRecord> {
            let task_data = serde_json::from_str(&task_data_raw)?;
            let status = JournalStatus::from_str(&status_raw).ok_or(JournalError::NotFound(id))?;
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            Ok(JournalRecord {
                id,
                task_data,
                status,
                priority,
                retry_count,
                error,
                created_at,
                updated_at,
            })
        })();

        Ok(parsed)
    }
}
