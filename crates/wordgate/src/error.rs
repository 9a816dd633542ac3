//! Typed errors for each library component. The binary wraps these in
//! [`eyre::Result`] with `.context(...)` at the wiring layer; library code
//! matches on these variants directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("invalid date range: start {0} is after end {1}")]
    InvalidRange(chrono::NaiveDate, chrono::NaiveDate),

    #[error("i/o error loading holiday calendar: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed holiday calendar: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("i/o error accessing capacity store: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed capacity data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to acquire advisory lock on {0}")]
    LockFailed(std::path::PathBuf),

    #[error("capacity adjustment would drive {0} below zero")]
    NegativeCapacity(chrono::NaiveDate),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no browser slot became available within {0:?}")]
    AcquireTimeout(std::time::Duration),

    #[error("browser session for slot {0} failed to start: {1}")]
    SessionStartFailed(usize, String),

    #[error("browser automation error: {0}")]
    Automation(String),

    #[error("login expired for slot {0}")]
    LoginExpired(usize),

    #[error("pool is closing, refusing to recreate slot {0}")]
    Closing(usize),

    #[error("refusing to start: master profile at {0} contains a lock-file sentinel")]
    MasterProfileLocked(std::path::PathBuf),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is shutting down")]
    ShuttingDown,

    #[error("task {0} not found in running set")]
    NotRunning(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state manager actor has shut down")]
    ActorGone,

    #[error("i/o error persisting state: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed persisted state: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Journal(#[from] ledger::JournalError),

    #[error("failure threshold of {0} consecutive failures exceeded")]
    FailureThresholdExceeded(u32),

    #[error("task timed out after {0:?}")]
    TaskTimeout(std::time::Duration),
}
