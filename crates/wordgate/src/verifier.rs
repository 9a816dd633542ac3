//! Post-accept verifier (spec §4.J): a sequential FIFO worker that re-checks
//! the platform's own status indicator after a delay and rolls capacity back
//! if acceptance didn't actually stick.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::capacity::CapacityStore;
use crate::domain::{VerificationItem, VerificationResult};
use crate::external::OperatorNotifier;
use crate::pool::BrowserPool;

pub const MAX_RESULTS: usize = 100;

struct Inner {
    pending: VecDeque<VerificationItem>,
    stopped: bool,
}

pub struct Verifier {
    inner: Mutex<Inner>,
    notify: Notify,
    pool: Arc<BrowserPool>,
    capacity: Arc<CapacityStore>,
    notifier: Arc<dyn OperatorNotifier>,
    results: Mutex<VecDeque<VerificationResult>>,
    pool_timeout: Duration,
}

impl Verifier {
    /// Spawns the single worker. `pool_timeout` bounds the session borrow
    /// used for the re-check navigation.
    pub fn spawn(
        pool: Arc<BrowserPool>,
        capacity: Arc<CapacityStore>,
        notifier: Arc<dyn OperatorNotifier>,
        pool_timeout: Duration,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            inner: Mutex::new(Inner { pending: VecDeque::new(), stopped: false }),
            notify: Notify::new(),
            pool,
            capacity,
            notifier,
            results: Mutex::new(VecDeque::new()),
            pool_timeout,
        });
        tokio::spawn(worker_loop(this.clone()));
        this
    }

    /// Enqueues `item`. A no-op once `stop()` has been called.
    pub async fn schedule(&self, item: VerificationItem) {
        let mut inner = self.inner.lock().await;
        if inner.stopped {
            return;
        }
        inner.pending.push_back(item);
        drop(inner);
        self.notify.notify_one();
    }

    /// Drops every pending item and prevents further scheduling. Any
    /// iteration already in flight runs to completion.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.stopped = true;
        inner.pending.clear();
        drop(inner);
        self.notify.notify_one();
    }

    pub async fn results(&self) -> Vec<VerificationResult> {
        self.results.lock().await.iter().cloned().collect()
    }

    async fn process(self: &Arc<Self>, item: VerificationItem) {
        let target = item.scheduled_at + chrono::Duration::milliseconds(item.verify_after_ms as i64);
        let now = Utc::now();
        if target > now {
            if let Ok(wait) = (target - now).to_std() {
                tokio::time::sleep(wait).await;
            }
        }

        let pool = self.pool.clone();
        let pool_handle = pool.clone();
        let url = item.url.clone();
        let outcome = pool_handle
            .with_session(self.pool_timeout, move |index| async move { pool.execute(index, &url).await })
            .await;

        let (verified, actual_status, error) = match &outcome {
            Ok(value) => {
                let status = value.get("status").and_then(|v| v.as_str()).map(str::to_string);
                let verified = matches!(status.as_deref(), Some("accepted") | Some("in progress"));
                (verified, status, None)
            }
            Err(e) => (false, None, Some(e.to_string())),
        };

        if !verified {
            if let Err(e) = self.capacity.release(&item.allocation_plan) {
                warn!(order_id = %item.order_id, error = %e, "Verifier::process: capacity rollback failed");
            }
            if let Err(e) = self.notifier.notify(&format!("verification failed for order {}", item.order_id)).await {
                warn!(order_id = %item.order_id, error = %e, "Verifier::process: operator notification failed");
            }
        }

        let result = VerificationResult {
            order_id: item.order_id,
            url: item.url,
            verified,
            actual_status,
            error,
            verified_at: Utc::now(),
        };
        let mut results = self.results.lock().await;
        results.push_back(result);
        if results.len() > MAX_RESULTS {
            results.pop_front();
        }
    }
}

async fn worker_loop(this: Arc<Verifier>) {
    loop {
        let item = {
            let mut inner = this.inner.lock().await;
            if inner.stopped {
                break;
            }
            inner.pending.pop_front()
        };
        match item {
            Some(item) => this.process(item).await,
            None => this.notify.notified().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AllocationPlan;
    use crate::pool::{BrowserSession, SessionFactory};
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct ScriptedSession {
        status: String,
    }

    #[async_trait]
    impl BrowserSession for ScriptedSession {
        fn is_connected(&self) -> bool {
            true
        }
        async fn execute(&self, _url: &str) -> Result<serde_json::Value, crate::error::PoolError> {
            Ok(serde_json::json!({"status": self.status}))
        }
        async fn close(&mut self) -> Result<(), crate::error::PoolError> {
            Ok(())
        }
    }

    struct ScriptedFactory {
        status: String,
    }

    #[async_trait]
    impl SessionFactory for ScriptedFactory {
        async fn create(&self, _profile_path: &std::path::Path) -> Result<Box<dyn BrowserSession>, crate::error::PoolError> {
            Ok(Box::new(ScriptedSession { status: self.status.clone() }))
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl OperatorNotifier for SilentNotifier {
        async fn notify(&self, _text: &str) -> Result<(), crate::external::CollaboratorError> {
            Ok(())
        }
    }

    fn item(order_id: &str) -> VerificationItem {
        VerificationItem {
            order_id: order_id.to_string(),
            url: "https://example.com".to_string(),
            allocation_plan: AllocationPlan::from_entries(vec![crate::domain::AllocationEntry {
                date: chrono::NaiveDate::from_ymd_opt(2026, 1, 28).unwrap(),
                amount: 500,
            }]),
            amount_words: 500,
            scheduled_at: Utc::now(),
            verify_after_ms: 0,
        }
    }

    #[tokio::test]
    async fn accepted_status_marks_verified_true() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BrowserPool::init(
            1,
            PathBuf::from(dir.path()),
            Arc::new(ScriptedFactory { status: "accepted".to_string() }),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        let capacity = Arc::new(CapacityStore::open(dir.path()).unwrap());
        capacity.apply(&item("ORD-1").allocation_plan).unwrap();
        let verifier = Verifier::spawn(Arc::new(pool), capacity, Arc::new(SilentNotifier), Duration::from_millis(100));
        verifier.schedule(item("ORD-1")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let results = verifier.results().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].verified);
    }

    #[tokio::test]
    async fn unverified_status_releases_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BrowserPool::init(
            1,
            PathBuf::from(dir.path()),
            Arc::new(ScriptedFactory { status: "rejected".to_string() }),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        let capacity = Arc::new(CapacityStore::open(dir.path()).unwrap());
        let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 28).unwrap();
        capacity.apply(&item("ORD-1").allocation_plan).unwrap();
        assert_eq!(capacity.get_remaining(date).unwrap() < crate::capacity::DEFAULT_CAP, true);

        let verifier = Verifier::spawn(Arc::new(pool), capacity.clone(), Arc::new(SilentNotifier), Duration::from_millis(100));
        verifier.schedule(item("ORD-1")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let results = verifier.results().await;
        assert!(!results[0].verified);
        assert_eq!(capacity.get_remaining(date).unwrap(), crate::capacity::DEFAULT_CAP);
    }

    #[tokio::test]
    async fn stop_clears_pending_queue() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BrowserPool::init(
            1,
            PathBuf::from(dir.path()),
            Arc::new(ScriptedFactory { status: "accepted".to_string() }),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        let capacity = Arc::new(CapacityStore::open(dir.path()).unwrap());
        let verifier = Verifier::spawn(Arc::new(pool), capacity, Arc::new(SilentNotifier), Duration::from_millis(100));
        verifier.stop().await;
        verifier.schedule(item("ORD-2")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(verifier.results().await.is_empty());
    }
}
