//! Delayed jobs stored in the `plug_jobs` table.
//!
//! Every process opening the same database file sees the same queue, so a
//! plug activated from one CLI invocation is run by a worker in another.
//! Draining happens inside an immediate transaction; a due job is handed to
//! exactly one caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::migrations;
use crate::error::{QueueError, StoreError};
use crate::plugs::queue::{due_time, Job, JobQueue};

/// How long a connection waits on a writer in another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
}

impl SqliteJobQueue {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    pub fn open_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// When the pending job with `id` becomes due.
    pub fn due_at(&self, channel: &str, id: &str) -> Result<Option<DateTime<Utc>>, QueueError> {
        let conn = self.lock()?;
        let millis: Option<i64> = conn
            .query_row(
                "SELECT due_at FROM plug_jobs WHERE channel = ?1 AND id = ?2",
                params![channel, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(millis.and_then(DateTime::<Utc>::from_timestamp_millis))
    }
}

fn decode(payload: &str) -> Result<Job, StoreError> {
    serde_json::from_str(payload).map_err(|e| StoreError::Corrupt {
        table: "plug_jobs",
        message: e.to_string(),
    })
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn emit(&self, channel: &str, job: Job) -> Result<(), QueueError> {
        let due_at = due_time(Utc::now(), job.options.delay)?;
        let payload = serde_json::to_string(&job).map_err(|e| StoreError::Corrupt {
            table: "plug_jobs",
            message: e.to_string(),
        })?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO plug_jobs (channel, id, payload, due_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![channel, job.id, payload, due_at.timestamp_millis()],
        )
        .map_err(StoreError::from)?;
        tracing::debug!(channel, id = %job.id, delay_ms = job.options.delay, "emit job");
        Ok(())
    }

    async fn delete(&self, channel: &str, id: &str) -> Result<(), QueueError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM plug_jobs WHERE channel = ?1 AND id = ?2",
                params![channel, id],
            )
            .map_err(StoreError::from)?;
        tracing::debug!(channel, id, removed = removed > 0, "delete job");
        Ok(())
    }

    async fn drain_due(&self, channel: &str, n: usize) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let rows: Vec<(String, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, payload FROM plug_jobs
                     WHERE channel = ?1 AND due_at <= ?2
                     ORDER BY due_at, id LIMIT ?3",
                )
                .map_err(StoreError::from)?;
            let limit = i64::try_from(n).unwrap_or(i64::MAX);
            let mapped = stmt
                .query_map(
                    params![channel, Utc::now().timestamp_millis(), limit],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(StoreError::from)?;
            mapped
                .collect::<Result<_, _>>()
                .map_err(StoreError::from)?
        };

        let mut jobs = Vec::with_capacity(rows.len());
        for (id, payload) in rows {
            tx.execute(
                "DELETE FROM plug_jobs WHERE channel = ?1 AND id = ?2",
                params![channel, id],
            )
            .map_err(StoreError::from)?;
            match decode(&payload) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!(channel, id = %id, error = %e, "dropping undecodable job"),
            }
        }
        tx.commit().map_err(StoreError::from)?;
        Ok(jobs)
    }

    async fn next_due_in(&self, channel: &str) -> Result<Option<Duration>, QueueError> {
        let conn = self.lock()?;
        let next: Option<i64> = conn
            .query_row(
                "SELECT MIN(due_at) FROM plug_jobs WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        let now = Utc::now().timestamp_millis();
        Ok(next.map(|at| Duration::from_millis(u64::try_from(at.saturating_sub(now)).unwrap_or(0))))
    }

    async fn pending(&self, channel: &str) -> Result<usize, QueueError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM plug_jobs WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
