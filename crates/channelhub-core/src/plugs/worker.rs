//! In-process consumer of the plug channel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::queue::{Job, JobOptions, JobQueue};
use super::scheduler::{PlugRunOutcome, PlugScheduler};
use super::{PlugJob, PLUGS_CHANNEL};
use crate::error::Result;

/// Counts of one [`PlugWorker::run_once`] tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub ran: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Jobs put back because the same key was already running.
    pub busy: usize,
}

/// Removes its key from the in-flight set on drop.
struct InFlight<'a> {
    keys: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(&self.key);
        }
    }
}

pub struct PlugWorker {
    scheduler: Arc<PlugScheduler>,
    queue: Arc<dyn JobQueue>,
    batch_size: usize,
    poll_interval: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl PlugWorker {
    pub fn new(
        scheduler: Arc<PlugScheduler>,
        queue: Arc<dyn JobQueue>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            queue,
            batch_size: batch_size.max(1),
            poll_interval,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, key: &str) -> Option<InFlight<'_>> {
        let mut keys = self.in_flight.lock().ok()?;
        if !keys.insert(key.to_string()) {
            return None;
        }
        Some(InFlight {
            keys: &self.in_flight,
            key: key.to_string(),
        })
    }

    async fn rearm(&self, payload: &PlugJob, delay: u64) -> Result<()> {
        let job = Job {
            id: payload.key(),
            options: JobOptions { delay },
            payload: serde_json::to_value(payload)?,
        };
        self.queue.emit(PLUGS_CHANNEL, job).await?;
        Ok(())
    }

    /// Fire every due plug job (up to the batch size) and re-arm the ones
    /// that should keep running.
    pub async fn run_once(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        for job in self.queue.drain_due(PLUGS_CHANNEL, self.batch_size).await? {
            let mut payload: PlugJob = match serde_json::from_value(job.payload) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(id = %job.id, error = %e, "dropping malformed plug job");
                    report.dropped += 1;
                    continue;
                }
            };

            let Some(_guard) = self.claim(&payload.key()) else {
                tracing::debug!(key = %payload.key(), "plug already running, postponing");
                let backoff = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX);
                self.rearm(&payload, backoff).await?;
                report.busy += 1;
                continue;
            };

            match self.scheduler.run_plug(&payload).await {
                Ok(PlugRunOutcome::Ran { .. }) => {
                    payload.retry = 1;
                    self.rearm(&payload, payload.delay).await?;
                    report.ran += 1;
                }
                Ok(outcome) => {
                    tracing::debug!(key = %payload.key(), ?outcome, "plug job not re-armed");
                    report.dropped += 1;
                }
                Err(e) => {
                    payload.retry += 1;
                    tracing::warn!(key = %payload.key(), retry = payload.retry, error = %e, "plug run failed");
                    self.rearm(&payload, payload.delay).await?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(batch = self.batch_size, poll = ?self.poll_interval, "plug worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "plug worker tick failed");
            }

            let wait = match self.queue.next_due_in(PLUGS_CHANNEL).await {
                Ok(next) => next.map_or(self.poll_interval, |d| d.min(self.poll_interval)),
                Err(e) => {
                    tracing::warn!(error = %e, "queue unavailable, retrying after poll interval");
                    self.poll_interval
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let pending = self.queue.pending(PLUGS_CHANNEL).await.unwrap_or(0);
        tracing::info!(pending, "plug worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugs::DelayQueue;
    use crate::providers::ProviderRegistry;
    use crate::storage::{SqliteJobQueue, SqliteStore};

    fn worker() -> (PlugWorker, Arc<DelayQueue>) {
        let queue = Arc::new(DelayQueue::new());
        let scheduler = Arc::new(PlugScheduler::new(
            Arc::new(SqliteStore::open_memory().unwrap()),
            Arc::new(ProviderRegistry::new()),
            queue.clone(),
            Duration::from_secs(1),
        ));
        let worker = PlugWorker::new(
            scheduler,
            Arc::clone(&queue) as Arc<dyn JobQueue>,
            10,
            Duration::from_millis(50),
        );
        (worker, queue)
    }

    fn payload() -> PlugJob {
        PlugJob {
            retry: 1,
            delay: 60_000,
            org_id: "org".into(),
            integration_id: "int".into(),
            func_name: "autoRepostPost".into(),
        }
    }

    async fn emit_now(queue: &DelayQueue, job: &PlugJob) {
        queue
            .emit(
                PLUGS_CHANNEL,
                Job {
                    id: job.key(),
                    options: JobOptions { delay: 0 },
                    payload: serde_json::to_value(job).unwrap(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn running_key_is_postponed() {
        let (worker, queue) = worker();
        let job = payload();
        emit_now(&queue, &job).await;

        let guard = worker.claim(&job.key()).unwrap();
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.busy, 1);
        assert!(queue.contains(PLUGS_CHANNEL, &job.key()));

        drop(guard);
        assert!(worker.claim(&job.key()).is_some());
    }

    #[tokio::test]
    async fn job_for_missing_integration_is_dropped() {
        let (worker, queue) = worker();
        emit_now(&queue, &payload()).await;

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let (worker, queue) = worker();
        queue
            .emit(
                PLUGS_CHANNEL,
                Job {
                    id: "bogus".into(),
                    options: JobOptions::default(),
                    payload: serde_json::json!({ "nope": true }),
                },
            )
            .await
            .unwrap();

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let (worker, _queue) = worker();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn worker_drains_a_database_queue() {
        let queue = Arc::new(SqliteJobQueue::open_memory().unwrap());
        let scheduler = Arc::new(PlugScheduler::new(
            Arc::new(SqliteStore::open_memory().unwrap()),
            Arc::new(ProviderRegistry::new()),
            Arc::clone(&queue) as Arc<dyn JobQueue>,
            Duration::from_secs(1),
        ));
        let worker = PlugWorker::new(
            scheduler,
            Arc::clone(&queue) as Arc<dyn JobQueue>,
            10,
            Duration::from_millis(50),
        );
        let job = payload();
        queue
            .emit(
                PLUGS_CHANNEL,
                Job {
                    id: job.key(),
                    options: JobOptions { delay: 0 },
                    payload: serde_json::to_value(&job).unwrap(),
                },
            )
            .await
            .unwrap();

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(queue.pending(PLUGS_CHANNEL).await.unwrap(), 0);
    }
}
