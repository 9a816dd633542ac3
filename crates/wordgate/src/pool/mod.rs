mod pool;
mod session;
mod slot;

pub use pool::{BrowserPool, Lease};
pub use session::{BrowserSession, SessionFactory};
pub use slot::{PoolStatus, SlotState};
