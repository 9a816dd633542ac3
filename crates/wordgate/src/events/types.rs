//! Event payloads published on the state manager's bus (spec §4.E, §9
//! "Event emitter" design note) and consumed by the broadcaster, metrics
//! collector, and coordinator.

use serde::{Deserialize, Serialize};

use crate::domain::{AcceptanceKind, ActiveTask};
use crate::state::{BrowserPoolSummary, ImapSummary, SystemStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "state:capacity")]
    StateCapacity { snapshot: serde_json::Value },

    #[serde(rename = "state:tasks")]
    StateTasks { active_tasks: Vec<ActiveTask> },

    #[serde(rename = "state:browserPool")]
    StateBrowserPool { summary: BrowserPoolSummary },

    #[serde(rename = "state:imap")]
    StateImap { summary: ImapSummary },

    #[serde(rename = "state:system")]
    StateSystem { status: SystemStatus },

    #[serde(rename = "state:reset")]
    StateReset,

    OnHoldDetected { order_id: String },

    TaskRejected { order_id: String, kind: AcceptanceKind, message: String },

    TaskAccepted { order_id: String },

    LoginExpired,

    CapacityUpdated { date: chrono::NaiveDate },

    TasksUpdated,

    #[serde(rename = "sync:completed")]
    SyncCompleted { completed: usize, on_hold: usize, still_active: usize },

    #[serde(rename = "sync:onhold")]
    SyncOnHold { order_ids: Vec<String> },
}

impl Event {
    /// Stable discriminant used for logging and debounce keying.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StateCapacity { .. } => "state:capacity",
            Event::StateTasks { .. } => "state:tasks",
            Event::StateBrowserPool { .. } => "state:browserPool",
            Event::StateImap { .. } => "state:imap",
            Event::StateSystem { .. } => "state:system",
            Event::StateReset => "state:reset",
            Event::OnHoldDetected { .. } => "onHoldDetected",
            Event::TaskRejected { .. } => "taskRejected",
            Event::TaskAccepted { .. } => "taskAccepted",
            Event::LoginExpired => "loginExpired",
            Event::CapacityUpdated { .. } => "capacityUpdated",
            Event::TasksUpdated => "tasksUpdated",
            Event::SyncCompleted { .. } => "sync:completed",
            Event::SyncOnHold { .. } => "sync:onhold",
        }
    }

    /// Events the broadcaster coalesces by this key; `None` means "fire
    /// immediately, never debounce" (spec 4.L).
    pub fn debounce_key(&self) -> Option<String> {
        match self {
            Event::StateCapacity { .. } => Some("state:capacity".to_string()),
            Event::StateTasks { .. } => Some("state:tasks".to_string()),
            _ => None,
        }
    }
}
