//! Shared data model: task offers, allocation plans, active tasks, and the
//! acceptance result returned by the acceptance engine.
//!
//! `Date` is a plain calendar date in the team's local time zone — no
//! instants, no UTC offsets. Dates travel through the system as
//! [`chrono::NaiveDate`]; time-of-day policy knobs use [`TimeOfDay`].

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub type Date = NaiveDate;

/// An hour+minute in the team's local time zone, used only for policy
/// comparisons (e.g. working-hours start/end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOfferStatus {
    OnHold,
    Active,
}

/// A work offer delivered by the email collaborator. Immutable once
/// constructed; `order_id` is the primary key within one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOffer {
    pub order_id: String,
    pub workflow_name: String,
    pub url: String,
    pub amount_words: u32,
    /// Raw deadline as supplied upstream, parsed by the acceptance engine.
    pub planned_end_date: String,
    pub status: TaskOfferStatus,
    pub received_date: Date,
}

/// One `(date, words)` entry in an [`AllocationPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub date: Date,
    pub amount: u32,
}

/// Ordered sequence of allocation entries, sorted ascending by date with
/// distinct dates. An empty plan is a legal (if infeasible) result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub entries: Vec<AllocationEntry>,
}

impl AllocationPlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u32 {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True iff entries are sorted ascending by date with no duplicate dates
    /// and every amount is positive. Used in tests and debug assertions.
    pub fn is_well_formed(&self) -> bool {
        self.entries.iter().all(|e| e.amount >= 1)
            && self.entries.windows(2).all(|w| w[0].date < w[1].date)
    }

    pub fn amount_for(&self, date: Date) -> Option<u32> {
        self.entries.iter().find(|e| e.date == date).map(|e| e.amount)
    }

    fn sorted(mut entries: Vec<AllocationEntry>) -> Self {
        entries.sort_by_key(|e| e.date);
        Self { entries }
    }

    pub fn from_entries(entries: Vec<AllocationEntry>) -> Self {
        Self::sorted(entries)
    }
}

/// A task that has been accepted and is in flight: queued, processing, or
/// awaiting post-accept verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTask {
    pub order_id: String,
    pub workflow_name: String,
    pub amount_words: u32,
    pub effective_deadline: NaiveDateTime,
    pub allocation_plan: AllocationPlan,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

/// Tag for the outcome of [`crate::acceptance::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceKind {
    AcceptedNormal,
    AcceptedUrgentInHours,
    RejectUrgentOutOfHours,
    RejectCapacity,
    RejectInvalidDeadline,
}

impl AcceptanceKind {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AcceptanceKind::AcceptedNormal | AcceptanceKind::AcceptedUrgentInHours)
    }

    /// External system-of-record status for a rejection code. Spec §9 keeps
    /// every rejection mapped to the same external status while metrics
    /// still track the specific code.
    pub fn rejection_code(&self) -> Option<&'static str> {
        match self {
            AcceptanceKind::RejectUrgentOutOfHours => Some("urgent_out_of_hours"),
            AcceptanceKind::RejectCapacity => Some("capacity"),
            AcceptanceKind::RejectInvalidDeadline => Some("invalid_deadline"),
            _ => None,
        }
    }
}

/// Every variant of the acceptance decision carries the same payload shape,
/// tagged by [`AcceptanceKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceResult {
    pub kind: AcceptanceKind,
    pub raw_deadline: Option<NaiveDateTime>,
    pub effective_deadline: Option<NaiveDateTime>,
    pub urgent: bool,
    pub in_working_hours: bool,
    pub allocation_plan: AllocationPlan,
    pub total_planned: u32,
    pub message: String,
}

impl AcceptanceResult {
    pub fn is_accepted(&self) -> bool {
        self.kind.is_accepted()
    }
}

/// A pending post-accept verification, FIFO-ordered by `scheduled_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationItem {
    pub order_id: String,
    pub url: String,
    pub allocation_plan: AllocationPlan,
    pub amount_words: u32,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    pub verify_after_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub order_id: String,
    pub url: String,
    pub verified: bool,
    pub actual_status: Option<String>,
    pub error: Option<String>,
    pub verified_at: chrono::DateTime<chrono::Utc>,
}
