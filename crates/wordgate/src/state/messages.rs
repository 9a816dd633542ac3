//! Commands and snapshot types for the state-manager actor (spec §4.E).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::capacity::CapacityMap;
use crate::domain::ActiveTask;
use crate::error::StateError;

pub type StateResponse<T> = Result<T, StateError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Initializing,
    Ready,
    Running,
    Paused,
    Error,
    ShuttingDown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserPoolSummary {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub initialized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImapSummary {
    pub connected: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub status: SystemStatus,
    pub start_time: DateTime<Utc>,
    pub last_error: Option<LastError>,
}

/// A full, independently-mutable copy of process state, fit for a
/// first-connection dashboard sync (spec §4.E, §9 "Deep-copy getters").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub capacity: CapacityMap,
    pub active_tasks: Vec<ActiveTask>,
    pub browser_pool: BrowserPoolSummary,
    pub imap: ImapSummary,
    pub system: SystemInfo,
}

/// What gets saved to / restored from `state.json`. Browser pool and IMAP
/// status are runtime-only and excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub capacity: CapacityMap,
    pub active_tasks: Vec<ActiveTask>,
    pub last_error: Option<LastError>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum StateCommand {
    GetCapacity { reply: oneshot::Sender<CapacityMap> },
    SetCapacity { capacity: CapacityMap, reply: oneshot::Sender<StateResponse<()>> },
    GetActiveTasks { reply: oneshot::Sender<Vec<ActiveTask>> },
    AddActiveTask { task: ActiveTask, reply: oneshot::Sender<StateResponse<()>> },
    RemoveActiveTask { order_id: String, reply: oneshot::Sender<StateResponse<()>> },
    ReplaceActiveTasks { tasks: Vec<ActiveTask>, reply: oneshot::Sender<StateResponse<()>> },
    SetBrowserPoolSummary { summary: BrowserPoolSummary, reply: oneshot::Sender<StateResponse<()>> },
    SetImapSummary { summary: ImapSummary, reply: oneshot::Sender<StateResponse<()>> },
    SetSystemStatus { status: SystemStatus, reply: oneshot::Sender<StateResponse<()>> },
    SetLastError { error: Option<LastError>, reply: oneshot::Sender<StateResponse<()>> },
    Snapshot { reply: oneshot::Sender<StateSnapshot> },
    Reset { reply: oneshot::Sender<StateResponse<()>> },
    SaveToFile { reply: oneshot::Sender<StateResponse<()>> },
    LoadFromFile { reply: oneshot::Sender<StateResponse<()>> },
    Shutdown,
}
