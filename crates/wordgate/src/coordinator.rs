//! Task coordinator (spec §4.I): the glue between the acceptance engine,
//! the concurrent queue, the browser pool, and every side effect a task's
//! outcome triggers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::acceptance::{self, Policy};
use crate::calendar::Calendar;
use crate::capacity::CapacityStore;
use crate::clock::Clock;
use crate::domain::{ActiveTask, AllocationPlan, TaskOffer, TaskOfferStatus, VerificationItem};
use crate::error::PoolError;
use crate::events::{Event, EventBus};
use crate::external::{OperatorNotifier, RecordStatus, SystemOfRecord};
use crate::history::{CapacityHistory, HistoryRecord};
use crate::metrics::MetricsCollector;
use crate::pool::BrowserPool;
use crate::queue::{ConcurrentQueue, QueueCallbacks};
use crate::quota::WordQuota;
use crate::state::StateManager;
use crate::verifier::Verifier;

/// Configuration knobs the coordinator itself owns, separate from the
/// acceptance `Policy` (spec §4.I step 5, §9 consecutive-failure tracker).
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub failure_threshold: u32,
    pub task_timeout: Duration,
    pub pool_acquire_timeout: Duration,
    pub verify_after_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            task_timeout: Duration::from_secs(180),
            pool_acquire_timeout: Duration::from_secs(30),
            verify_after_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct TaskMeta {
    order_id: String,
    workflow_name: String,
    url: String,
    amount_words: u32,
    effective_deadline: chrono::NaiveDateTime,
    allocation_plan: AllocationPlan,
    processing_start_ms: i64,
}

pub struct TaskCoordinator {
    state: StateManager,
    events: Arc<EventBus>,
    capacity: Arc<CapacityStore>,
    calendar: Arc<Calendar>,
    policy: Policy,
    clock: Clock,
    pool: Arc<BrowserPool>,
    system_of_record: Arc<dyn SystemOfRecord>,
    notifier: Arc<dyn OperatorNotifier>,
    metrics: Arc<MetricsCollector>,
    verifier: Arc<Verifier>,
    config: CoordinatorConfig,
    consecutive_failures: AtomicU32,
    history: Option<Arc<CapacityHistory>>,
    quota: Option<Arc<WordQuota>>,
}

impl TaskCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateManager,
        events: Arc<EventBus>,
        capacity: Arc<CapacityStore>,
        calendar: Arc<Calendar>,
        policy: Policy,
        clock: Clock,
        pool: Arc<BrowserPool>,
        system_of_record: Arc<dyn SystemOfRecord>,
        notifier: Arc<dyn OperatorNotifier>,
        metrics: Arc<MetricsCollector>,
        verifier: Arc<Verifier>,
        config: CoordinatorConfig,
        history: Option<Arc<CapacityHistory>>,
        quota: Option<Arc<WordQuota>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            events,
            capacity,
            calendar,
            policy,
            clock,
            pool,
            system_of_record,
            notifier,
            metrics,
            verifier,
            config,
            consecutive_failures: AtomicU32::new(0),
            history,
            quota,
        })
    }

    /// Entry point for the email collaborator's at-least-once callback
    /// (spec §6). `queue` is the main concurrent queue; submission happens
    /// only on acceptance.
    pub async fn handle_offer(self: &Arc<Self>, offer: TaskOffer, queue: &Arc<ConcurrentQueue>, meta_queue: &Arc<ConcurrentQueue>) {
        self.metrics.record_received();

        if offer.status == TaskOfferStatus::OnHold {
            self.handle_on_hold(offer, meta_queue).await;
            return;
        }

        let result = acceptance::evaluate(&offer, &self.policy, &self.calendar, &self.capacity, &self.clock);

        if !result.is_accepted() {
            let code = result.kind.rejection_code().unwrap_or("unknown");
            self.metrics.record_rejected(code);
            if let Err(e) = self
                .system_of_record
                .update_status(&offer.order_id, RecordStatus::Declined, code, Some(offer.received_date))
                .await
            {
                warn!(order_id = %offer.order_id, error = %e, "handle_offer: failed to update system-of-record for decline");
            }
            self.events.emit(Event::TaskRejected {
                order_id: offer.order_id.clone(),
                kind: result.kind,
                message: result.message.clone(),
            });
            info!(order_id = %offer.order_id, code, "handle_offer: rejected");
            return;
        }

        let effective_deadline = result.effective_deadline.expect("accepted result always carries an effective deadline");
        let active = ActiveTask {
            order_id: offer.order_id.clone(),
            workflow_name: offer.workflow_name.clone(),
            amount_words: offer.amount_words,
            effective_deadline,
            allocation_plan: result.allocation_plan.clone(),
            added_at: Utc::now(),
        };
        if let Err(e) = self.state.add_active_task(active).await {
            warn!(order_id = %offer.order_id, error = %e, "handle_offer: failed to register active task");
        }
        self.metrics.record_accepted();
        self.events.emit(Event::TaskAccepted { order_id: offer.order_id.clone() });

        let meta = TaskMeta {
            order_id: offer.order_id.clone(),
            workflow_name: offer.workflow_name.clone(),
            url: offer.url.clone(),
            amount_words: offer.amount_words,
            effective_deadline,
            allocation_plan: result.allocation_plan,
            processing_start_ms: Utc::now().timestamp_millis(),
        };
        let task_meta = serde_json::to_value(&meta).unwrap_or_default();

        let pool = self.pool.clone();
        let url = offer.url.clone();
        let acquire_timeout = self.config.pool_acquire_timeout;
        let task_timeout = self.config.task_timeout;
        queue
            .submit(task_meta, None, move || async move {
                let pool_handle = pool.clone();
                let work = pool_handle.with_session(acquire_timeout, move |index| async move { pool.execute(index, &url).await });
                match tokio::time::timeout(task_timeout, work).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(classify_pool_error(&e)),
                    Err(_) => Err("TASK_TIMEOUT".to_string()),
                }
            })
            .await;
    }

    async fn handle_on_hold(self: &Arc<Self>, offer: TaskOffer, meta_queue: &Arc<ConcurrentQueue>) {
        self.events.emit(Event::OnHoldDetected { order_id: offer.order_id.clone() });

        let order_id = offer.order_id.clone();
        let received_date = offer.received_date;
        let system_of_record = self.system_of_record.clone();
        let capacity = self.capacity.clone();
        let state = self.state.clone();

        let meta = serde_json::json!({"order_id": order_id, "kind": "on_hold"});
        meta_queue
            .submit(meta, Some(1), move || async move {
                if let Err(e) = system_of_record
                    .update_status(&order_id, RecordStatus::OnHold, "on_hold", Some(received_date))
                    .await
                {
                    warn!(order_id = %order_id, error = %e, "handle_on_hold: failed to update system-of-record");
                }

                let existing = state.get_active_tasks().await.unwrap_or_default();
                if let Some(task) = existing.into_iter().find(|t| t.order_id == order_id) {
                    if let Err(e) = capacity.release(&task.allocation_plan) {
                        warn!(order_id = %order_id, error = %e, "handle_on_hold: failed to release capacity");
                    }
                    let _ = state.remove_active_task(order_id.clone()).await;
                }
                Ok(serde_json::json!({"order_id": order_id}))
            })
            .await;
    }

    async fn on_success_inner(&self, meta: &TaskMeta, result: serde_json::Value) {
        if let Err(e) = self.capacity.apply(&meta.allocation_plan) {
            warn!(order_id = %meta.order_id, error = %e, "on_success: failed to apply capacity");
        }
        for entry in &meta.allocation_plan.entries {
            self.events.emit(Event::CapacityUpdated { date: entry.date });
        }

        let processing_time_ms_for_history = (Utc::now().timestamp_millis() - meta.processing_start_ms).max(0) as u64;
        if let Some(history) = &self.history {
            if let Err(e) = history.append(
                HistoryRecord {
                    date: self.clock.today(),
                    order_id: meta.order_id.clone(),
                    allocated_words: meta.amount_words,
                    completion_time_ms: processing_time_ms_for_history,
                    timestamp: Utc::now(),
                },
                self.clock.today(),
            ) {
                warn!(order_id = %meta.order_id, error = %e, "on_success: failed to append capacity history");
            }
        }
        if let Some(quota) = &self.quota {
            let key = quota.window_key(self.clock.now_local());
            if let Err(e) = quota.add(&key, meta.amount_words) {
                warn!(order_id = %meta.order_id, error = %e, "on_success: failed to update word quota");
            }
        }

        if let Err(e) = self
            .system_of_record
            .update_status(&meta.order_id, RecordStatus::Accepted, &meta.workflow_name, None)
            .await
        {
            warn!(order_id = %meta.order_id, error = %e, "on_success: failed to update system-of-record");
        }

        let processing_time_ms = (Utc::now().timestamp_millis() - meta.processing_start_ms).max(0) as u64;
        self.metrics.record_completed(processing_time_ms);
        self.consecutive_failures.store(0, Ordering::SeqCst);

        let _ = self.state.remove_active_task(meta.order_id.clone()).await;
        self.events.emit(Event::TasksUpdated);

        self.verifier
            .schedule(VerificationItem {
                order_id: meta.order_id.clone(),
                url: result
                    .get("url")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_default(),
                allocation_plan: meta.allocation_plan.clone(),
                amount_words: meta.amount_words,
                scheduled_at: Utc::now(),
                verify_after_ms: self.config.verify_after_ms,
            })
            .await;
    }

    async fn on_error_inner(&self, meta: &TaskMeta, error: &str) {
        if error == "LOGIN_EXPIRED" {
            self.events.emit(Event::LoginExpired);
            let _ = self.state.remove_active_task(meta.order_id.clone()).await;
            return;
        }

        let lowered = error.to_lowercase();
        let status = if lowered.contains("on hold") {
            RecordStatus::OnHold
        } else if lowered.contains("404") || lowered.contains("unreadable_status") || lowered.contains("step1") {
            RecordStatus::Missed
        } else {
            RecordStatus::Failed
        };

        if status != RecordStatus::OnHold {
            if let Err(e) = self.capacity.release(&meta.allocation_plan) {
                warn!(order_id = %meta.order_id, error = %e, "on_error: failed to release capacity after task failure");
            }
        }

        if let Err(e) = self
            .system_of_record
            .update_status(&meta.order_id, status, &meta.workflow_name, None)
            .await
        {
            warn!(order_id = %meta.order_id, error = %e, "on_error: failed to update system-of-record");
        }

        self.metrics.record_failed();
        let _ = self.state.remove_active_task(meta.order_id.clone()).await;

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold {
            if let Err(e) = self
                .notifier
                .notify(&format!("{failures} consecutive task failures (latest: {error})"))
                .await
            {
                warn!(error = %e, "on_error: failed to notify operators of consecutive failures");
            }
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }
}

fn classify_pool_error(e: &PoolError) -> String {
    match e {
        PoolError::LoginExpired(_) => "LOGIN_EXPIRED".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl QueueCallbacks for TaskCoordinator {
    async fn on_success(&self, task_meta: &serde_json::Value, result: serde_json::Value) {
        match serde_json::from_value::<TaskMeta>(task_meta.clone()) {
            Ok(meta) => self.on_success_inner(&meta, result).await,
            Err(e) => warn!(error = %e, "QueueCallbacks::on_success: malformed task meta"),
        }
    }

    async fn on_error(&self, task_meta: &serde_json::Value, error: &str) {
        match serde_json::from_value::<TaskMeta>(task_meta.clone()) {
            Ok(meta) => self.on_error_inner(&meta, error).await,
            Err(e) => warn!(error = %e, "QueueCallbacks::on_error: malformed task meta"),
        }
    }

    async fn on_idle(&self) {}
}

/// No-op-on-idle callbacks for the low-concurrency side-effect queue (spec
/// §4.I step 1): the work closures themselves perform and log their side
/// effects, so there is nothing left for the callbacks to classify.
pub struct SideEffectCallbacks;

#[async_trait]
impl QueueCallbacks for SideEffectCallbacks {
    async fn on_success(&self, _task_meta: &serde_json::Value, _result: serde_json::Value) {}

    async fn on_error(&self, task_meta: &serde_json::Value, error: &str) {
        warn!(?task_meta, error, "side-effect queue task failed");
    }

    async fn on_idle(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::domain::TaskOfferStatus;
    use crate::external::CollaboratorError;
    use crate::pool::{BrowserSession, SessionFactory};
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingSystemOfRecord {
        updates: TokioMutex<Vec<(String, String)>>,
    }

    impl RecordingSystemOfRecord {
        fn new() -> Arc<Self> {
            Arc::new(Self { updates: TokioMutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl SystemOfRecord for RecordingSystemOfRecord {
        async fn update_status(
            &self,
            order_id: &str,
            status: RecordStatus,
            _category: &str,
            _received_date: Option<chrono::NaiveDate>,
        ) -> Result<(), CollaboratorError> {
            self.updates.lock().await.push((order_id.to_string(), status.as_label().to_string()));
            Ok(())
        }

        async fn read_status_map(&self) -> Result<std::collections::HashMap<String, String>, CollaboratorError> {
            Ok(std::collections::HashMap::new())
        }
    }

    struct SilentNotifier {
        count: AtomicUsize,
    }

    #[async_trait]
    impl OperatorNotifier for SilentNotifier {
        async fn notify(&self, _text: &str) -> Result<(), CollaboratorError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StatusSession {
        status: &'static str,
    }

    #[async_trait]
    impl BrowserSession for StatusSession {
        fn is_connected(&self) -> bool {
            true
        }
        async fn execute(&self, url: &str) -> Result<serde_json::Value, PoolError> {
            Ok(serde_json::json!({"status": self.status, "url": url}))
        }
        async fn close(&mut self) -> Result<(), PoolError> {
            Ok(())
        }
    }

    struct StatusFactory {
        status: &'static str,
    }

    #[async_trait]
    impl SessionFactory for StatusFactory {
        async fn create(&self, _profile_path: &std::path::Path) -> Result<Box<dyn BrowserSession>, PoolError> {
            Ok(Box::new(StatusSession { status: self.status }))
        }
    }

    fn offer(order_id: &str, status: TaskOfferStatus) -> TaskOffer {
        TaskOffer {
            order_id: order_id.to_string(),
            workflow_name: "wf".to_string(),
            url: "https://example.com/order".to_string(),
            amount_words: 1000,
            planned_end_date: "2026-02-02 18:00:00".to_string(),
            status,
            received_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 28).unwrap(),
        }
    }

    async fn build_coordinator(
        dir: &std::path::Path,
        status: &'static str,
    ) -> (Arc<TaskCoordinator>, Arc<RecordingSystemOfRecord>, Arc<ConcurrentQueue>, Arc<ConcurrentQueue>) {
        let events = crate::events::create_event_bus();
        let state = StateManager::spawn(dir.join("state.json"), events.clone());
        let capacity = Arc::new(CapacityStore::open(dir).unwrap());
        let calendar = Arc::new(Calendar::open(dir.join("holidays.json")).unwrap());
        let tz = Clock::parse_tz("UTC");
        let clock = Clock::fixed(tz, chrono::Utc.with_ymd_and_hms(2026, 1, 28, 14, 0, 0).unwrap());
        let pool = Arc::new(
            BrowserPool::init(1, PathBuf::from(dir), Arc::new(StatusFactory { status }), Duration::from_millis(10))
                .await
                .unwrap(),
        );
        let system_of_record = RecordingSystemOfRecord::new();
        let notifier = Arc::new(SilentNotifier { count: AtomicUsize::new(0) });
        let metrics = Arc::new(MetricsCollector::new());
        let verifier = Verifier::spawn(pool.clone(), capacity.clone(), notifier.clone(), Duration::from_millis(100));

        let coordinator = TaskCoordinator::new(
            state,
            events,
            capacity,
            calendar,
            Policy::default(),
            clock,
            pool,
            system_of_record.clone(),
            notifier,
            metrics,
            verifier,
            CoordinatorConfig::default(),
            None,
            None,
        );

        let main_queue = ConcurrentQueue::new(2, None, Duration::from_secs(60), coordinator.clone());
        let meta_queue = ConcurrentQueue::new(2, None, Duration::from_secs(60), Arc::new(SideEffectCallbacks));
        (coordinator, system_of_record, main_queue, meta_queue)
    }

    #[tokio::test]
    async fn accepted_offer_flows_through_to_accepted_status() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, sor, main_queue, meta_queue) = build_coordinator(dir.path(), "accepted").await;
        coordinator
            .handle_offer(offer("ORD-1", TaskOfferStatus::Active), &main_queue, &meta_queue)
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let updates = sor.updates.lock().await;
        assert!(updates.iter().any(|(id, status)| id == "ORD-1" && status == "Accepted"));
    }

    #[tokio::test]
    async fn rejected_offer_updates_declined_status() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, sor, main_queue, meta_queue) = build_coordinator(dir.path(), "accepted").await;
        let mut bad_offer = offer("ORD-2", TaskOfferStatus::Active);
        bad_offer.planned_end_date = "not-a-date".to_string();
        coordinator.handle_offer(bad_offer, &main_queue, &meta_queue).await;
        let updates = sor.updates.lock().await;
        assert_eq!(updates.as_slice(), [("ORD-2".to_string(), "Declined".to_string())]);
    }

    #[tokio::test]
    async fn on_hold_offer_updates_on_hold_status() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, sor, main_queue, meta_queue) = build_coordinator(dir.path(), "accepted").await;
        coordinator
            .handle_offer(offer("ORD-3", TaskOfferStatus::OnHold), &main_queue, &meta_queue)
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let updates = sor.updates.lock().await;
        assert!(updates.iter().any(|(id, status)| id == "ORD-3" && status == "On Hold"));
    }

    #[tokio::test]
    async fn accepted_offer_records_history_and_quota() {
        let dir = tempfile::tempdir().unwrap();
        let events = crate::events::create_event_bus();
        let state = StateManager::spawn(dir.path().join("state.json"), events.clone());
        let capacity = Arc::new(CapacityStore::open(dir.path()).unwrap());
        let calendar = Arc::new(Calendar::open(dir.path().join("holidays.json")).unwrap());
        let tz = Clock::parse_tz("UTC");
        let clock = Clock::fixed(tz, chrono::Utc.with_ymd_and_hms(2026, 1, 28, 14, 0, 0).unwrap());
        let pool = Arc::new(
            BrowserPool::init(1, dir.path().to_path_buf(), Arc::new(StatusFactory { status: "accepted" }), Duration::from_millis(10))
                .await
                .unwrap(),
        );
        let system_of_record = RecordingSystemOfRecord::new();
        let notifier = Arc::new(SilentNotifier { count: AtomicUsize::new(0) });
        let metrics = Arc::new(MetricsCollector::new());
        let verifier = Verifier::spawn(pool.clone(), capacity.clone(), notifier.clone(), Duration::from_millis(100));
        let history = Arc::new(CapacityHistory::open(dir.path()));
        let quota = Arc::new(WordQuota::open(dir.path(), 6));

        let coordinator = TaskCoordinator::new(
            state,
            events,
            capacity,
            calendar,
            Policy::default(),
            clock,
            pool,
            system_of_record.clone(),
            notifier,
            metrics,
            verifier,
            CoordinatorConfig::default(),
            Some(history.clone()),
            Some(quota.clone()),
        );
        let main_queue = ConcurrentQueue::new(2, None, Duration::from_secs(60), coordinator.clone());
        let meta_queue = ConcurrentQueue::new(2, None, Duration::from_secs(60), Arc::new(SideEffectCallbacks));

        coordinator
            .handle_offer(offer("ORD-4", TaskOfferStatus::Active), &main_queue, &meta_queue)
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let records = history.load().unwrap();
        assert!(records.iter().any(|r| r.order_id == "ORD-4"));

        let key = quota.window_key(coordinator.clock.now_local());
        assert!(quota.get(&key).unwrap() > 0);
    }
}
