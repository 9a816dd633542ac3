//! Status sync (spec §4.K): a periodic single-flight reconciliation
//! between the local active-task list and the external system-of-record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capacity::CapacityStore;
use crate::domain::ActiveTask;
use crate::events::{Event, EventBus};
use crate::external::{OperatorNotifier, SystemOfRecord};
use crate::state::StateManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub completed: usize,
    pub on_hold: usize,
    pub still_active: usize,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Classification of one tracked order against the external status map.
enum Disposition {
    Completed,
    OnHold,
    StillActive,
}

fn classify(status: &str) -> Disposition {
    let lowered = status.to_lowercase();
    if lowered.contains("complete") || lowered.contains("accepted") {
        Disposition::Completed
    } else if lowered.contains("hold") {
        Disposition::OnHold
    } else {
        Disposition::StillActive
    }
}

pub struct StatusSync {
    state: StateManager,
    events: Arc<EventBus>,
    capacity: Arc<CapacityStore>,
    system_of_record: Arc<dyn SystemOfRecord>,
    notifier: Arc<dyn OperatorNotifier>,
    running: AtomicBool,
    last_result: tokio::sync::Mutex<Option<SyncResult>>,
}

impl StatusSync {
    pub fn new(
        state: StateManager,
        events: Arc<EventBus>,
        capacity: Arc<CapacityStore>,
        system_of_record: Arc<dyn SystemOfRecord>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            events,
            capacity,
            system_of_record,
            notifier,
            running: AtomicBool::new(false),
            last_result: tokio::sync::Mutex::new(None),
        })
    }

    pub async fn last_result(&self) -> Option<SyncResult> {
        self.last_result.lock().await.clone()
    }

    /// Runs one reconciliation tick. Skips entirely if a previous tick is
    /// still in flight (spec §4.K step 1).
    pub async fn tick(&self, today: crate::domain::Date) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let result = self.run_once(today).await;
        {
            let mut last = self.last_result.lock().await;
            *last = Some(result);
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_once(&self, today: crate::domain::Date) -> SyncResult {
        let active_tasks = match self.state.get_active_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "StatusSync::run_once: failed to read active tasks");
                return SyncResult {
                    completed: 0,
                    on_hold: 0,
                    still_active: 0,
                    timestamp: Utc::now(),
                    success: false,
                    error: Some(e.to_string()),
                };
            }
        };
        let before_count = active_tasks.len();

        let status_map = match self.system_of_record.read_status_map().await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "StatusSync::run_once: failed to read external status map");
                return SyncResult {
                    completed: 0,
                    on_hold: 0,
                    still_active: before_count,
                    timestamp: Utc::now(),
                    success: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let mut completed = Vec::new();
        let mut on_hold = Vec::new();
        let mut still_active = Vec::new();
        for task in active_tasks {
            match status_map.get(&task.order_id).map(|s| classify(s)) {
                Some(Disposition::Completed) => completed.push(task),
                Some(Disposition::OnHold) => on_hold.push(task),
                _ => still_active.push(task),
            }
        }

        let still_active_plans: Vec<_> = still_active.iter().map(|t| t.allocation_plan.clone()).collect();
        match self.capacity.sync_with_active_tasks(&still_active_plans, today) {
            Ok(summary) => {
                for date in summary.changed_dates {
                    self.events.emit(Event::CapacityUpdated { date });
                }
            }
            Err(e) => {
                warn!(error = %e, "StatusSync::run_once: failed to resync capacity");
            }
        }

        let still_active_count = still_active.len();
        let on_hold_ids: Vec<String> = on_hold.iter().map(|t| t.order_id.clone()).collect();
        if let Err(e) = self.state.replace_active_tasks(still_active.clone()).await {
            warn!(error = %e, "StatusSync::run_once: failed to replace active tasks");
        }

        if still_active_count != before_count {
            self.events.emit(Event::TasksUpdated);
        }
        if !completed.is_empty() || !on_hold.is_empty() {
            self.events.emit(Event::SyncCompleted {
                completed: completed.len(),
                on_hold: on_hold.len(),
                still_active: still_active_count,
            });
        }
        if !on_hold_ids.is_empty() {
            self.events.emit(Event::SyncOnHold { order_ids: on_hold_ids });
        }

        if !completed.is_empty() {
            if let Err(e) = self
                .notifier
                .notify(&format!("{} task(s) completed per sync reconciliation", completed.len()))
                .await
            {
                warn!(error = %e, "StatusSync::run_once: failed to notify operators of completed tasks");
            }
        }

        info!(
            completed = completed.len(),
            on_hold = on_hold.len(),
            still_active = still_active_count,
            "StatusSync::run_once: reconciliation complete"
        );

        SyncResult {
            completed: completed.len(),
            on_hold: on_hold.len(),
            still_active: still_active_count,
            timestamp: Utc::now(),
            success: true,
            error: None,
        }
    }
}
