//! StateManager actor (spec §4.E): the single process-wide source of truth
//! for capacity, active tasks, and subsystem health, with every mutator
//! publishing a typed event after applying its change.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::capacity::CapacityMap;
use crate::domain::ActiveTask;
use crate::error::StateError;
use crate::events::{Event, EventBus};

use super::messages::{
    BrowserPoolSummary, ImapSummary, LastError, PersistedState, StateCommand, StateResponse,
    StateSnapshot, SystemInfo, SystemStatus,
};

struct Inner {
    capacity: CapacityMap,
    active_tasks: Vec<ActiveTask>,
    browser_pool: BrowserPoolSummary,
    imap: ImapSummary,
    system: SystemInfo,
    state_file: PathBuf,
}

impl Inner {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            capacity: self.capacity.clone(),
            active_tasks: self.active_tasks.clone(),
            browser_pool: self.browser_pool.clone(),
            imap: self.imap.clone(),
            system: self.system.clone(),
        }
    }

    fn save_to_file(&self) -> Result<(), StateError> {
        let persisted = PersistedState {
            capacity: self.capacity.clone(),
            active_tasks: self.active_tasks.clone(),
            last_error: self.system.last_error.clone(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(&self.state_file, json)?;
        Ok(())
    }

    fn load_from_file(&mut self) -> Result<(), StateError> {
        if !self.state_file.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.state_file)?;
        if raw.trim().is_empty() {
            return Ok(());
        }
        let persisted: PersistedState = serde_json::from_str(&raw)?;
        self.capacity = persisted.capacity;
        self.active_tasks = persisted.active_tasks;
        self.system.last_error = persisted.last_error;
        Ok(())
    }
}

/// Cloneable handle to send commands to the state-manager actor.
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawns the actor task and loads any persisted state from
    /// `state_file`. A missing file starts from empty state, not an error.
    pub fn spawn(state_file: impl AsRef<Path>, events: std::sync::Arc<EventBus>) -> Self {
        debug!(state_file = %state_file.as_ref().display(), "StateManager::spawn: called");
        let mut inner = Inner {
            capacity: CapacityMap::new(),
            active_tasks: Vec::new(),
            browser_pool: BrowserPoolSummary::default(),
            imap: ImapSummary::default(),
            system: SystemInfo {
                status: SystemStatus::Initializing,
                start_time: Utc::now(),
                last_error: None,
            },
            state_file: state_file.as_ref().to_path_buf(),
        };
        if let Err(e) = inner.load_from_file() {
            tracing::warn!(error = %e, "StateManager::spawn: failed to load persisted state, starting fresh");
        }

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(inner, rx, events));
        info!("StateManager spawned");
        Self { tx }
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> StateCommand) -> Result<T, StateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ActorGone)?;
        reply_rx.await.map_err(|_| StateError::ActorGone)
    }

    pub async fn get_capacity(&self) -> Result<CapacityMap, StateError> {
        self.call(|reply| StateCommand::GetCapacity { reply }).await
    }

    pub async fn set_capacity(&self, capacity: CapacityMap) -> StateResponse<()> {
        self.call(|reply| StateCommand::SetCapacity { capacity, reply }).await?
    }

    pub async fn get_active_tasks(&self) -> Result<Vec<ActiveTask>, StateError> {
        self.call(|reply| StateCommand::GetActiveTasks { reply }).await
    }

    /// Idempotent by `order_id` — adding the same task twice has the same
    /// effect as adding it once.
    pub async fn add_active_task(&self, task: ActiveTask) -> StateResponse<()> {
        self.call(|reply| StateCommand::AddActiveTask { task, reply }).await?
    }

    pub async fn remove_active_task(&self, order_id: impl Into<String>) -> StateResponse<()> {
        self.call(|reply| StateCommand::RemoveActiveTask { order_id: order_id.into(), reply })
            .await?
    }

    pub async fn replace_active_tasks(&self, tasks: Vec<ActiveTask>) -> StateResponse<()> {
        self.call(|reply| StateCommand::ReplaceActiveTasks { tasks, reply }).await?
    }

    pub async fn set_browser_pool_summary(&self, summary: BrowserPoolSummary) -> StateResponse<()> {
        self.call(|reply| StateCommand::SetBrowserPoolSummary { summary, reply }).await?
    }

    pub async fn set_imap_summary(&self, summary: ImapSummary) -> StateResponse<()> {
        self.call(|reply| StateCommand::SetImapSummary { summary, reply }).await?
    }

    pub async fn set_system_status(&self, status: SystemStatus) -> StateResponse<()> {
        self.call(|reply| StateCommand::SetSystemStatus { status, reply }).await?
    }

    pub async fn set_last_error(&self, error: Option<LastError>) -> StateResponse<()> {
        self.call(|reply| StateCommand::SetLastError { error, reply }).await?
    }

    /// Full deep copy, suitable for a first-connection dashboard sync.
    pub async fn snapshot(&self) -> Result<StateSnapshot, StateError> {
        self.call(|reply| StateCommand::Snapshot { reply }).await
    }

    pub async fn reset(&self) -> StateResponse<()> {
        self.call(|reply| StateCommand::Reset { reply }).await?
    }

    pub async fn save_to_file(&self) -> StateResponse<()> {
        self.call(|reply| StateCommand::SaveToFile { reply }).await?
    }

    pub async fn load_from_file(&self) -> StateResponse<()> {
        self.call(|reply| StateCommand::LoadFromFile { reply }).await?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(StateCommand::Shutdown).await;
    }
}

async fn actor_loop(mut inner: Inner, mut rx: mpsc::Receiver<StateCommand>, events: std::sync::Arc<EventBus>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::GetCapacity { reply } => {
                let _ = reply.send(inner.capacity.clone());
            }
            StateCommand::SetCapacity { capacity, reply } => {
                inner.capacity = capacity;
                events.emit(Event::StateCapacity {
                    snapshot: serde_json::to_value(&inner.capacity).unwrap_or_default(),
                });
                let _ = reply.send(Ok(()));
            }
            StateCommand::GetActiveTasks { reply } => {
                let _ = reply.send(inner.active_tasks.clone());
            }
            StateCommand::AddActiveTask { task, reply } => {
                if !inner.active_tasks.iter().any(|t| t.order_id == task.order_id) {
                    inner.active_tasks.push(task);
                    events.emit(Event::StateTasks { active_tasks: inner.active_tasks.clone() });
                }
                let _ = reply.send(Ok(()));
            }
            StateCommand::RemoveActiveTask { order_id, reply } => {
                inner.active_tasks.retain(|t| t.order_id != order_id);
                events.emit(Event::StateTasks { active_tasks: inner.active_tasks.clone() });
                let _ = reply.send(Ok(()));
            }
            StateCommand::ReplaceActiveTasks { tasks, reply } => {
                inner.active_tasks = tasks;
                events.emit(Event::StateTasks { active_tasks: inner.active_tasks.clone() });
                let _ = reply.send(Ok(()));
            }
            StateCommand::SetBrowserPoolSummary { summary, reply } => {
                inner.browser_pool = summary.clone();
                events.emit(Event::StateBrowserPool { summary });
                let _ = reply.send(Ok(()));
            }
            StateCommand::SetImapSummary { summary, reply } => {
                inner.imap = summary.clone();
                events.emit(Event::StateImap { summary });
                let _ = reply.send(Ok(()));
            }
            StateCommand::SetSystemStatus { status, reply } => {
                inner.system.status = status;
                events.emit(Event::StateSystem { status });
                let _ = reply.send(Ok(()));
            }
            StateCommand::SetLastError { error, reply } => {
                inner.system.last_error = error;
                events.emit(Event::StateSystem { status: inner.system.status });
                let _ = reply.send(Ok(()));
            }
            StateCommand::Snapshot { reply } => {
                let _ = reply.send(inner.snapshot());
            }
            StateCommand::Reset { reply } => {
                inner.capacity.clear();
                inner.active_tasks.clear();
                inner.system.last_error = None;
                events.emit(Event::StateReset);
                let _ = reply.send(Ok(()));
            }
            StateCommand::SaveToFile { reply } => {
                let _ = reply.send(inner.save_to_file());
            }
            StateCommand::LoadFromFile { reply } => {
                let _ = reply.send(inner.load_from_file());
            }
            StateCommand::Shutdown => break,
        }
    }
    debug!("state manager actor loop exiting");
}
