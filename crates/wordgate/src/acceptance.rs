//! Acceptance engine (spec component D): combines the calendar, allocator,
//! and a handful of policy knobs into an accept/reject decision for one
//! task offer.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::allocator;
use crate::calendar::Calendar;
use crate::capacity::CapacityStore;
use crate::clock::Clock;
use crate::domain::{AcceptanceKind, AcceptanceResult, TaskOffer};

/// Policy knobs, loaded from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Policy {
    pub work_start_hour: u32,
    pub work_end_hour: u32,
    pub urgent_hours_threshold: i64,
    pub shift_night_deadline: bool,
    pub urgent_days_threshold: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            work_start_hour: 10,
            work_end_hour: 19,
            urgent_hours_threshold: 6,
            shift_night_deadline: true,
            urgent_days_threshold: crate::allocator::URGENT_DAYS_THRESHOLD,
        }
    }
}

/// Evaluates `offer` against `policy`, consulting `calendar` and `capacity`
/// for the allocation step. All time comparisons use `clock`'s local time
/// zone.
pub fn evaluate(
    offer: &TaskOffer,
    policy: &Policy,
    calendar: &Calendar,
    capacity: &CapacityStore,
    clock: &Clock,
) -> AcceptanceResult {
    let parsed = parse_deadline(&offer.planned_end_date);
    let Some(raw_deadline) = parsed else {
        return AcceptanceResult {
            kind: AcceptanceKind::RejectInvalidDeadline,
            raw_deadline: None,
            effective_deadline: None,
            urgent: false,
            in_working_hours: false,
            allocation_plan: crate::domain::AllocationPlan::empty(),
            total_planned: 0,
            message: format!("could not parse deadline: {}", offer.planned_end_date),
        };
    };

    // Midnight adjust: exactly 00:00 is treated as 23:59 of the previous day.
    let raw_deadline = if raw_deadline.time() == NaiveTime::from_hms_opt(0, 0, 0).unwrap() {
        (raw_deadline.date() - Duration::days(1)).and_hms_opt(23, 59, 0).unwrap()
    } else {
        raw_deadline
    };

    let now = clock.now_local();
    let hours_to_deadline = (raw_deadline - now).num_hours();
    let urgent = hours_to_deadline <= policy.urgent_hours_threshold;
    let in_working_hours =
        policy.work_start_hour <= raw_deadline.hour() && raw_deadline.hour() < policy.work_end_hour;

    if urgent && !in_working_hours {
        return AcceptanceResult {
            kind: AcceptanceKind::RejectUrgentOutOfHours,
            raw_deadline: Some(raw_deadline),
            effective_deadline: None,
            urgent,
            in_working_hours,
            allocation_plan: crate::domain::AllocationPlan::empty(),
            total_planned: 0,
            message: "deadline is urgent but outside working hours".to_string(),
        };
    }

    let effective_deadline = if policy.shift_night_deadline && raw_deadline.hour() < policy.work_start_hour {
        (raw_deadline.date() - Duration::days(1)).and_hms_opt(23, 59, 0).unwrap()
    } else {
        raw_deadline
    };

    let exclude_today = now.hour() >= policy.work_end_hour;

    let plan = allocator::allocate(
        calendar,
        capacity,
        offer.amount_words,
        effective_deadline,
        now.date(),
        exclude_today,
        policy.urgent_days_threshold,
    );
    let total_planned = plan.total();

    if total_planned < offer.amount_words {
        return AcceptanceResult {
            kind: AcceptanceKind::RejectCapacity,
            raw_deadline: Some(raw_deadline),
            effective_deadline: Some(effective_deadline),
            urgent,
            in_working_hours,
            allocation_plan: plan,
            total_planned,
            message: format!(
                "capacity insufficient: needed {}, could only plan {}",
                offer.amount_words, total_planned
            ),
        };
    }

    let kind = if urgent {
        AcceptanceKind::AcceptedUrgentInHours
    } else {
        AcceptanceKind::AcceptedNormal
    };
    AcceptanceResult {
        kind,
        raw_deadline: Some(raw_deadline),
        effective_deadline: Some(effective_deadline),
        urgent,
        in_working_hours,
        allocation_plan: plan,
        total_planned,
        message: "accepted".to_string(),
    }
}

fn parse_deadline(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock_at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Clock {
        let tz = Clock::parse_tz("UTC");
        let at = chrono::Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap();
        Clock::fixed(tz, at)
    }

    fn fixture() -> (tempfile::TempDir, Calendar, CapacityStore) {
        let dir = tempfile::tempdir().unwrap();
        let calendar = Calendar::open(dir.path().join("holidays.json")).unwrap();
        let capacity = CapacityStore::open(dir.path()).unwrap();
        (dir, calendar, capacity)
    }

    fn offer(words: u32, deadline: &str) -> TaskOffer {
        TaskOffer {
            order_id: "ORD-1".to_string(),
            workflow_name: "wf".to_string(),
            url: "https://example.com/ORD-1".to_string(),
            amount_words: words,
            planned_end_date: deadline.to_string(),
            status: crate::domain::TaskOfferStatus::Active,
            received_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 28).unwrap(),
        }
    }

    #[test]
    fn scenario_1_normal_balanced_accept() {
        let (_dir, calendar, capacity) = fixture();
        let clock = clock_at(2026, 1, 28, 14, 0);
        let policy = Policy::default();
        let result = evaluate(&offer(12000, "2026-02-02 18:00:00"), &policy, &calendar, &capacity, &clock);
        assert_eq!(result.kind, AcceptanceKind::AcceptedNormal);
        assert_eq!(result.total_planned, 12000);
    }

    #[test]
    fn scenario_2_urgent_accept() {
        let (_dir, calendar, capacity) = fixture();
        let clock = clock_at(2026, 1, 28, 14, 0);
        let policy = Policy::default();
        let result = evaluate(&offer(5000, "2026-01-28 18:00:00"), &policy, &calendar, &capacity, &clock);
        assert_eq!(result.kind, AcceptanceKind::AcceptedUrgentInHours);
        assert!(result.urgent);
    }

    #[test]
    fn scenario_3_urgent_reject() {
        let (_dir, calendar, capacity) = fixture();
        let clock = clock_at(2026, 1, 28, 14, 0);
        let policy = Policy::default();
        let result = evaluate(&offer(3000, "2026-01-28 20:00:00"), &policy, &calendar, &capacity, &clock);
        assert_eq!(result.kind, AcceptanceKind::RejectUrgentOutOfHours);
        assert!(result.allocation_plan.is_empty());
    }

    #[test]
    fn scenario_4_capacity_reject_with_partial_plan() {
        let (_dir, calendar, capacity) = fixture();
        capacity
            .apply(&crate::domain::AllocationPlan::from_entries(vec![
                crate::domain::AllocationEntry {
                    date: chrono::NaiveDate::from_ymd_opt(2026, 1, 29).unwrap(),
                    amount: 12000,
                },
                crate::domain::AllocationEntry {
                    date: chrono::NaiveDate::from_ymd_opt(2026, 1, 30).unwrap(),
                    amount: 12000,
                },
                crate::domain::AllocationEntry {
                    date: chrono::NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
                    amount: 12000,
                },
            ]))
            .unwrap();
        let clock = clock_at(2026, 1, 28, 19, 30);
        let policy = Policy::default();
        let result = evaluate(&offer(10000, "2026-02-02 18:00:00"), &policy, &calendar, &capacity, &clock);
        assert_eq!(result.kind, AcceptanceKind::RejectCapacity);
        assert_eq!(result.total_planned, 0);
    }

    #[test]
    fn scenario_5_night_shift_effective_deadline() {
        let (_dir, calendar, capacity) = fixture();
        let clock = clock_at(2026, 1, 28, 14, 0);
        let policy = Policy::default();
        let result = evaluate(&offer(1000, "2026-01-30 08:00:00"), &policy, &calendar, &capacity, &clock);
        assert_eq!(
            result.effective_deadline,
            Some(
                chrono::NaiveDate::from_ymd_opt(2026, 1, 29)
                    .unwrap()
                    .and_hms_opt(23, 59, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn scenario_6_midnight_normalization() {
        let (_dir, calendar, capacity) = fixture();
        let clock = clock_at(2026, 1, 28, 14, 0);
        let policy = Policy::default();
        let result = evaluate(&offer(1000, "2026-01-30 00:00:00"), &policy, &calendar, &capacity, &clock);
        assert_eq!(
            result.raw_deadline,
            Some(
                chrono::NaiveDate::from_ymd_opt(2026, 1, 29)
                    .unwrap()
                    .and_hms_opt(23, 59, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn invalid_deadline_string_rejects() {
        let (_dir, calendar, capacity) = fixture();
        let clock = clock_at(2026, 1, 28, 14, 0);
        let policy = Policy::default();
        let result = evaluate(&offer(1000, "not-a-date"), &policy, &calendar, &capacity, &clock);
        assert_eq!(result.kind, AcceptanceKind::RejectInvalidDeadline);
    }
}
