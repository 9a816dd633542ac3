//! wordgate - automated task-acceptance gate for a translation management
//! platform.
//!
//! Decides whether an incoming translation task offer fits the team's
//! daily word-count budget, tracks accepted work through to completion,
//! and keeps an external system-of-record and dashboard in sync.
//!
//! # Modules
//!
//! - [`calendar`] - business-day calendar with hot-reloaded holiday sets
//! - [`capacity`] - per-date used-word counts and cap overrides
//! - [`allocator`] - spreads a word count across eligible business days
//! - [`acceptance`] - accept/reject decision for one task offer
//! - [`state`] - actor-based snapshot of capacity, active tasks, and system status
//! - [`pool`] - browser worker pool
//! - [`queue`] - bounded-concurrency task executor with optional journaling
//! - [`coordinator`] - glues acceptance, queue, pool, and side effects together
//! - [`verifier`] - post-accept status re-check
//! - [`sync`] - periodic reconciliation against the external system-of-record
//! - [`broadcaster`] - debounced fan-out of state events to the dashboard
//! - [`metrics`] - in-memory counters and derived rates
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface
//! - [`daemon`] - PID-file daemon lifecycle

pub mod acceptance;
pub mod allocator;
pub mod broadcaster;
pub mod calendar;
pub mod capacity;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod events;
pub mod external;
pub mod history;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod quota;
pub mod state;
pub mod sync;
pub mod verifier;

pub use acceptance::Policy;
pub use broadcaster::Broadcaster;
pub use calendar::Calendar;
pub use capacity::CapacityStore;
pub use clock::Clock;
pub use config::Config;
pub use coordinator::{CoordinatorConfig, TaskCoordinator};
pub use domain::{AcceptanceKind, AcceptanceResult, ActiveTask, TaskOffer, TaskOfferStatus};
pub use events::{create_event_bus, Event, EventBus};
pub use history::CapacityHistory;
pub use metrics::MetricsCollector;
pub use pool::BrowserPool;
pub use queue::ConcurrentQueue;
pub use quota::WordQuota;
pub use state::StateManager;
pub use sync::StatusSync;
pub use verifier::Verifier;
