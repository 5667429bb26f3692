//! Delayed job queue keyed by job id.
//!
//! [`JobQueue`] is the contract the scheduler and the worker need from a
//! queue transport: emit a job under an id, delete it by id, and take the
//! jobs that are due. [`DelayQueue`] is the in-process implementation with
//! last-write-wins per id; `storage::SqliteJobQueue` shares one queue
//! between processes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::QueueError;

/// Per-job delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Milliseconds to wait before the job becomes due.
    pub delay: u64,
}

/// A job as handed to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub options: JobOptions,
    pub payload: serde_json::Value,
}

/// When a job emitted at `now` with `delay_ms` becomes due.
///
/// # Errors
/// [`QueueError::InvalidDelay`] when the delay cannot be placed on the
/// calendar.
pub fn due_time(now: DateTime<Utc>, delay_ms: u64) -> Result<DateTime<Utc>, QueueError> {
    i64::try_from(delay_ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .ok_or(QueueError::InvalidDelay { delay: delay_ms })
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Emit `job` on `channel`. An existing job with the same id is replaced.
    async fn emit(&self, channel: &str, job: Job) -> Result<(), QueueError>;

    /// Remove the job with `id`. Removing an unknown id is not an error.
    async fn delete(&self, channel: &str, id: &str) -> Result<(), QueueError>;

    /// Remove and return up to `n` due jobs of `channel`, earliest first.
    async fn drain_due(&self, channel: &str, n: usize) -> Result<Vec<Job>, QueueError>;

    /// Time until the earliest job of `channel` is due, zero when one
    /// already is, `None` when the channel is empty.
    async fn next_due_in(&self, channel: &str) -> Result<Option<std::time::Duration>, QueueError>;

    /// Number of jobs pending on `channel`.
    async fn pending(&self, channel: &str) -> Result<usize, QueueError>;
}

#[derive(Debug, Clone)]
struct PendingJob {
    channel: String,
    job: Job,
    due_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Pending jobs by "channel/id".
    pending: HashMap<String, PendingJob>,
    /// Number of emit calls that replaced an already pending job.
    replaced: u64,
}

/// In-process delay queue.
#[derive(Debug, Default)]
pub struct DelayQueue {
    state: Mutex<QueueState>,
}

fn slot(channel: &str, id: &str) -> String {
    format!("{channel}/{id}")
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue mutex poisoned".into()))
    }

    fn insert(&self, channel: &str, job: Job) -> Result<(), QueueError> {
        let due_at = due_time(Utc::now(), job.options.delay)?;
        let mut state = self.lock()?;
        let previous = state.pending.insert(
            slot(channel, &job.id),
            PendingJob {
                channel: channel.to_string(),
                job,
                due_at,
            },
        );
        if previous.is_some() {
            state.replaced += 1;
        }
        Ok(())
    }

    /// Remove and return up to `n` jobs of `channel` that are due, earliest
    /// first.
    pub fn drain_due(&self, channel: &str, n: usize) -> Result<Vec<Job>, QueueError> {
        let now = Utc::now();
        let mut state = self.lock()?;

        let mut due: Vec<(DateTime<Utc>, String)> = state
            .pending
            .iter()
            .filter(|(_, p)| p.channel == channel && p.due_at <= now)
            .map(|(k, p)| (p.due_at, k.clone()))
            .collect();
        due.sort();
        due.truncate(n);

        Ok(due
            .into_iter()
            .filter_map(|(_, k)| state.pending.remove(&k))
            .map(|p| p.job)
            .collect())
    }

    pub fn contains(&self, channel: &str, id: &str) -> bool {
        self.lock()
            .map(|s| s.pending.contains_key(&slot(channel, id)))
            .unwrap_or(false)
    }

    /// When the pending job with `id` becomes due.
    pub fn due_at(&self, channel: &str, id: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .ok()?
            .pending
            .get(&slot(channel, id))
            .map(|p| p.due_at)
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many emits overwrote a pending job with the same id.
    pub fn replaced_count(&self) -> u64 {
        self.lock().map(|s| s.replaced).unwrap_or(0)
    }
}

#[async_trait]
impl JobQueue for DelayQueue {
    async fn emit(&self, channel: &str, job: Job) -> Result<(), QueueError> {
        tracing::debug!(channel, id = %job.id, delay_ms = job.options.delay, "emit job");
        self.insert(channel, job)
    }

    async fn delete(&self, channel: &str, id: &str) -> Result<(), QueueError> {
        let removed = self.lock()?.pending.remove(&slot(channel, id)).is_some();
        tracing::debug!(channel, id, removed, "delete job");
        Ok(())
    }

    async fn drain_due(&self, channel: &str, n: usize) -> Result<Vec<Job>, QueueError> {
        DelayQueue::drain_due(self, channel, n)
    }

    async fn next_due_in(&self, channel: &str) -> Result<Option<std::time::Duration>, QueueError> {
        let next = self
            .lock()?
            .pending
            .values()
            .filter(|p| p.channel == channel)
            .map(|p| p.due_at)
            .min();
        Ok(next.map(|at| (at - Utc::now()).to_std().unwrap_or_default()))
    }

    async fn pending(&self, channel: &str) -> Result<usize, QueueError> {
        Ok(self
            .lock()?
            .pending
            .values()
            .filter(|p| p.channel == channel)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, delay: u64, v: i64) -> Job {
        Job {
            id: id.to_string(),
            options: JobOptions { delay },
            payload: serde_json::json!({ "v": v }),
        }
    }

    #[tokio::test]
    async fn emit_and_drain_immediate_job() {
        let queue = DelayQueue::new();
        queue.emit("plugs", job("a", 0, 1)).await.unwrap();
        assert_eq!(queue.len(), 1);

        let drained = queue.drain_due("plugs", 10).unwrap();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn same_id_replaces_pending_job() {
        let queue = DelayQueue::new();
        queue.emit("plugs", job("a", 0, 1)).await.unwrap();
        queue.emit("plugs", job("a", 0, 2)).await.unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.replaced_count(), 1);
        let drained = queue.drain_due("plugs", 10).unwrap();
        assert_eq!(drained[0].payload["v"], 2);
    }

    #[tokio::test]
    async fn delayed_job_is_not_due_yet() {
        let queue = DelayQueue::new();
        queue.emit("plugs", job("a", 60_000, 1)).await.unwrap();

        assert!(queue.drain_due("plugs", 10).unwrap().is_empty());
        let next = queue.next_due_in("plugs").await.unwrap().unwrap();
        assert!(next.as_secs() > 0 && next.as_secs() <= 60);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let queue = DelayQueue::new();
        queue.emit("plugs", job("a", 0, 1)).await.unwrap();
        queue.emit("other", job("a", 0, 2)).await.unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_due("plugs", 10).unwrap().len(), 1);
        assert!(queue.contains("other", "a"));
    }

    #[tokio::test]
    async fn delete_unknown_id_is_ok() {
        let queue = DelayQueue::new();
        queue.delete("plugs", "missing").await.unwrap();
        queue.emit("plugs", job("a", 0, 1)).await.unwrap();
        queue.delete("plugs", "a").await.unwrap();
        queue.delete("plugs", "a").await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn drain_respects_limit() {
        let queue = DelayQueue::new();
        for i in 0..5 {
            queue.emit("plugs", job(&format!("j{i}"), 0, i)).await.unwrap();
        }
        assert_eq!(queue.drain_due("plugs", 3).unwrap().len(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn huge_delay_is_rejected() {
        let queue = DelayQueue::new();
        let err = queue.emit("plugs", job("a", u64::MAX, 1)).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidDelay { delay: u64::MAX }));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn trait_view_is_scoped_to_channel() {
        let queue = DelayQueue::new();
        let dyn_queue: &dyn JobQueue = &queue;
        dyn_queue.emit("plugs", job("a", 30_000, 1)).await.unwrap();
        dyn_queue.emit("other", job("b", 0, 2)).await.unwrap();

        assert_eq!(dyn_queue.pending("plugs").await.unwrap(), 1);
        let wait = dyn_queue.next_due_in("plugs").await.unwrap().unwrap();
        assert!(wait > std::time::Duration::from_secs(20));
        assert!(dyn_queue.drain_due("plugs", 10).await.unwrap().is_empty());
        assert_eq!(
            dyn_queue.next_due_in("other").await.unwrap(),
            Some(std::time::Duration::ZERO)
        );
    }
}
