//! ledger - embedded SQLite-backed durable journal
//!
//! A single fixed-schema transactional log (WAL journaling, `synchronous =
//! NORMAL`) used to survive process restarts between submission and
//! completion of a unit of work. One table, one record shape
//! ([`JournalRecord`]); callers store an opaque JSON blob alongside status,
//! priority, and retry bookkeeping.

mod error;
mod record;
mod store;

pub use error::JournalError;
pub use record::{JournalRecord, JournalStatus};
pub use store::JournalStore;
