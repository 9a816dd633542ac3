use std::path::PathBuf;

use super::session::BrowserSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Available,
    Busy,
    Recreating,
}

/// A stable lane in the pool. `index` survives session recreation; the
/// session handle does not (spec §3 `BrowserSlot`).
pub struct BrowserSlot {
    pub index: usize,
    pub profile_path: PathBuf,
    pub session: Option<Box<dyn BrowserSession>>,
    pub state: SlotState,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub initialized: bool,
}
