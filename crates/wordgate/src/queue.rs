//! Concurrent task queue (spec §4.G): a bounded-concurrency FIFO executor
//! with an optional persistent journal mirror for crash recovery.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ledger::JournalStore;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

pub type TaskOutcome = Result<serde_json::Value, String>;

/// Hooks invoked as queued work completes. `on_success`/`on_error` run only
/// after the in-flight slot has been freed, so a callback that submits more
/// work cannot deadlock the concurrency counter (spec §9).
#[async_trait]
pub trait QueueCallbacks: Send + Sync {
    async fn on_success(&self, task_meta: &serde_json::Value, result: serde_json::Value);
    async fn on_error(&self, task_meta: &serde_json::Value, error: &str);
    async fn on_idle(&self);
}

struct Inner {
    pending: usize,
    in_flight: usize,
}

pub struct ConcurrentQueue {
    semaphore: Arc<Semaphore>,
    inner: Mutex<Inner>,
    journal: Option<Arc<JournalStore>>,
    callbacks: Arc<dyn QueueCallbacks>,
    peak_in_flight: AtomicUsize,
}

impl ConcurrentQueue {
    /// Builds a queue bounded to `concurrency` in-flight tasks. If
    /// `journal` is set, recovers any row stuck in `processing` for longer
    /// than `stale_timeout` back to `pending` before accepting submissions.
    pub fn new(
        concurrency: usize,
        journal: Option<Arc<JournalStore>>,
        stale_timeout: Duration,
        callbacks: Arc<dyn QueueCallbacks>,
    ) -> Arc<Self> {
        if let Some(journal) = &journal {
            match journal.recover_stale(stale_timeout) {
                Ok(count) if count > 0 => {
                    debug!(count, "ConcurrentQueue::new: recovered stale processing rows");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "ConcurrentQueue::new: failed to recover stale rows"),
            }
        }
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            inner: Mutex::new(Inner { pending: 0, in_flight: 0 }),
            journal,
            callbacks,
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Enqueues `work` with `task_meta` for diagnostics/retry. If
    /// persistence is enabled, writes a `pending` journal row first and
    /// threads its id through `processing`/`completed`/`failed`.
    pub async fn submit<F, Fut>(self: &Arc<Self>, task_meta: serde_json::Value, priority: Option<i64>, work: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let journal_id = match &self.journal {
            Some(journal) => match journal.enqueue(task_meta.clone(), priority) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "ConcurrentQueue::submit: failed to journal task, proceeding unpersisted");
                    None
                }
            },
            None => None,
        };

        {
            let mut inner = self.inner.lock().await;
            inner.pending += 1;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_one(task_meta, journal_id, work).await;
        });
    }

    async fn run_one<F, Fut>(self: Arc<Self>, task_meta: serde_json::Value, journal_id: Option<i64>, work: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let permit = self.semaphore.clone().acquire_owned().await.expect("queue semaphore closed");
        {
            let mut inner = self.inner.lock().await;
            inner.pending -= 1;
            inner.in_flight += 1;
            self.peak_in_flight.fetch_max(inner.in_flight, Ordering::Relaxed);
        }

        if let (Some(journal), Some(id)) = (&self.journal, journal_id) {
            if let Err(e) = journal.mark_processing(id) {
                warn!(error = %e, id, "ConcurrentQueue::run_one: failed to mark row processing");
            }
        }

        let result = work().await;

        if let (Some(journal), Some(id)) = (&self.journal, journal_id) {
            let outcome = match &result {
                Ok(_) => journal.mark_completed(id),
                Err(err) => journal.mark_failed(id, err),
            };
            if let Err(e) = outcome {
                warn!(error = %e, id, "ConcurrentQueue::run_one: failed to record journal outcome");
            }
        }

        let became_idle = {
            let mut inner = self.inner.lock().await;
            inner.in_flight -= 1;
            inner.pending == 0 && inner.in_flight == 0
        };
        drop(permit);

        match result {
            Ok(value) => self.callbacks.on_success(&task_meta, value).await,
            Err(err) => self.callbacks.on_error(&task_meta, &err).await,
        }

        if became_idle {
            self.callbacks.on_idle().await;
        }
    }
}
