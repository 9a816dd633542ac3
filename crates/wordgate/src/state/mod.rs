mod manager;
mod messages;

pub use manager::StateManager;
pub use messages::{
    BrowserPoolSummary, ImapSummary, LastError, PersistedState, StateResponse, StateSnapshot,
    SystemInfo, SystemStatus,
};
