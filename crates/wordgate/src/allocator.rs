//! Daily capacity allocator (spec component C): spreads a word count across
//! eligible business days under per-day caps, with distinct "urgent" and
//! "balanced" modes and a second-pass fill step for the balanced case.

use chrono::{Duration, NaiveDateTime};

use crate::calendar::Calendar;
use crate::capacity::CapacityStore;
use crate::domain::{AllocationEntry, AllocationPlan, Date};

pub const URGENT_DAYS_THRESHOLD: usize = 2;

/// Produces an allocation plan for `required_words` due by
/// `effective_deadline`, given `today` as the first candidate date.
///
/// The allocator never writes to the capacity store — it only reads
/// remaining capacity per date.
pub fn allocate(
    calendar: &Calendar,
    capacity: &CapacityStore,
    required_words: u32,
    effective_deadline: NaiveDateTime,
    today: Date,
    exclude_today: bool,
    urgent_days_threshold: usize,
) -> AllocationPlan {
    if required_words == 0 {
        return AllocationPlan::empty();
    }

    let deadline_date = effective_deadline.date();
    if deadline_date < today {
        return AllocationPlan::empty();
    }

    let mut dates = Vec::new();
    let mut cursor = today;
    while cursor <= deadline_date {
        if calendar.is_business_day(cursor) && !(exclude_today && cursor == today) {
            dates.push(cursor);
        }
        cursor += Duration::days(1);
    }

    if dates.is_empty() {
        return AllocationPlan::empty();
    }

    let remaining_capacity = |d: Date| capacity.get_remaining(d).unwrap_or(0);

    let urgent = dates.len() < urgent_days_threshold;
    let entries = if urgent {
        allocate_urgent(required_words, &dates, remaining_capacity)
    } else {
        allocate_balanced(required_words, &dates, remaining_capacity)
    };

    AllocationPlan::from_entries(entries)
}

fn allocate_urgent(
    required_words: u32,
    dates: &[Date],
    remaining_capacity: impl Fn(Date) -> u32,
) -> Vec<AllocationEntry> {
    let mut entries = Vec::new();
    let mut remaining_needed = required_words;
    for &date in dates {
        if remaining_needed == 0 {
            break;
        }
        let take = remaining_needed.min(remaining_capacity(date));
        if take > 0 {
            entries.push(AllocationEntry { date, amount: take });
            remaining_needed -= take;
        }
    }
    entries
}

fn allocate_balanced(
    required_words: u32,
    dates: &[Date],
    remaining_capacity: impl Fn(Date) -> u32,
) -> Vec<AllocationEntry> {
    let per_day = (required_words as f64 / dates.len() as f64).ceil() as u32;

    let mut entries: Vec<AllocationEntry> = Vec::new();
    let mut used_first_pass: std::collections::HashMap<Date, u32> = std::collections::HashMap::new();
    let mut remaining_needed = required_words;

    for &date in dates {
        if remaining_needed == 0 {
            break;
        }
        let cap_left = remaining_capacity(date);
        let take = per_day.min(remaining_needed).min(cap_left);
        if take > 0 {
            entries.push(AllocationEntry { date, amount: take });
            used_first_pass.insert(date, take);
            remaining_needed -= take;
        }
    }

    if remaining_needed > 0 {
        let mut slack: Vec<(Date, u32)> = dates
            .iter()
            .map(|&d| {
                let cap_left = remaining_capacity(d);
                let already = used_first_pass.get(&d).copied().unwrap_or(0);
                (d, cap_left.saturating_sub(already))
            })
            .filter(|(_, slack)| *slack > 0)
            .collect();
        slack.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (date, available_slack) in slack {
            if remaining_needed == 0 {
                break;
            }
            let take = remaining_needed.min(available_slack);
            if take == 0 {
                continue;
            }
            if let Some(existing) = entries.iter_mut().find(|e| e.date == date) {
                existing.amount += take;
            } else {
                entries.push(AllocationEntry { date, amount: take });
            }
            remaining_needed -= take;
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> Date {
        Date::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixture() -> (tempfile::TempDir, Calendar, CapacityStore) {
        let dir = tempdir().unwrap();
        let calendar = Calendar::open(dir.path().join("holidays.json")).unwrap();
        let capacity = CapacityStore::open(dir.path()).unwrap();
        (dir, calendar, capacity)
    }

    #[test]
    fn required_zero_returns_empty() {
        let (_dir, calendar, capacity) = fixture();
        let plan = allocate(
            &calendar,
            &capacity,
            0,
            date(2026, 2, 2).and_hms_opt(18, 0, 0).unwrap(),
            date(2026, 1, 28),
            false,
            URGENT_DAYS_THRESHOLD,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn scenario_1_normal_balanced_accept() {
        let (_dir, calendar, capacity) = fixture();
        let plan = allocate(
            &calendar,
            &capacity,
            12000,
            date(2026, 2, 2).and_hms_opt(18, 0, 0).unwrap(),
            date(2026, 1, 28),
            false,
            URGENT_DAYS_THRESHOLD,
        );
        assert_eq!(plan.total(), 12000);
        let expected = vec![
            (date(2026, 1, 28), 3000),
            (date(2026, 1, 29), 3000),
            (date(2026, 1, 30), 3000),
            (date(2026, 2, 2), 3000),
        ];
        let actual: Vec<(Date, u32)> = plan.entries.iter().map(|e| (e.date, e.amount)).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn scenario_2_urgent_single_day() {
        let (_dir, calendar, capacity) = fixture();
        let plan = allocate(
            &calendar,
            &capacity,
            5000,
            date(2026, 1, 28).and_hms_opt(18, 0, 0).unwrap(),
            date(2026, 1, 28),
            false,
            URGENT_DAYS_THRESHOLD,
        );
        assert_eq!(plan.entries, vec![AllocationEntry { date: date(2026, 1, 28), amount: 5000 }]);
    }

    #[test]
    fn scenario_4_capacity_reject_partial_plan() {
        let (_dir, calendar, capacity) = fixture();
        capacity
            .apply(&AllocationPlan::from_entries(vec![
                AllocationEntry { date: date(2026, 1, 29), amount: 12000 },
                AllocationEntry { date: date(2026, 1, 30), amount: 12000 },
                AllocationEntry { date: date(2026, 2, 2), amount: 12000 },
            ]))
            .unwrap();
        let plan = allocate(
            &calendar,
            &capacity,
            10000,
            date(2026, 2, 2).and_hms_opt(18, 0, 0).unwrap(),
            date(2026, 1, 28),
            true,
            URGENT_DAYS_THRESHOLD,
        );
        assert!(plan.is_empty());
        assert_eq!(plan.total(), 0);
    }

    #[test]
    fn plan_never_exceeds_remaining_capacity_at_emission() {
        let (_dir, calendar, capacity) = fixture();
        capacity
            .apply(&AllocationPlan::from_entries(vec![AllocationEntry {
                date: date(2026, 1, 28),
                amount: 11000,
            }]))
            .unwrap();
        let plan = allocate(
            &calendar,
            &capacity,
            5000,
            date(2026, 1, 29).and_hms_opt(18, 0, 0).unwrap(),
            date(2026, 1, 28),
            false,
            URGENT_DAYS_THRESHOLD,
        );
        let day_one = plan.amount_for(date(2026, 1, 28)).unwrap_or(0);
        assert!(day_one <= 1000);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> Date {
        Date::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixture() -> (tempfile::TempDir, Calendar, CapacityStore) {
        let dir = tempdir().unwrap();
        let calendar = Calendar::open(dir.path().join("holidays.json")).unwrap();
        let capacity = CapacityStore::open(dir.path()).unwrap();
        (dir, calendar, capacity)
    }

    proptest! {
        /// Against a fresh, uncommitted capacity store every business day has
        /// the full default cap free, so the allocator must place every
        /// requested word somewhere within the window (spec §8: allocator
        /// conservation) as long as the window holds at least one business
        /// day with room.
        #[test]
        fn conserves_required_words_when_window_has_room(
            required_words in 0u32..50_000u32,
            span_days in 1i64..14i64,
        ) {
            let (_dir, calendar, capacity) = fixture();
            let today = date(2026, 1, 26); // Monday
            let deadline = (today + Duration::days(span_days)).and_hms_opt(18, 0, 0).unwrap();
            let plan = allocate(&calendar, &capacity, required_words, deadline, today, false, URGENT_DAYS_THRESHOLD);

            let business_days_in_window = {
                let mut count = 0u32;
                let mut cursor = today;
                while cursor <= deadline.date() {
                    if calendar.is_business_day(cursor) {
                        count += 1;
                    }
                    cursor += Duration::days(1);
                }
                count
            };
            let window_capacity = business_days_in_window * crate::capacity::DEFAULT_CAP;

            if window_capacity >= required_words {
                prop_assert_eq!(plan.total(), required_words);
            } else {
                prop_assert!(plan.total() <= window_capacity);
            }
        }

        /// Every entry in a plan lands on a business day within
        /// `[today, deadline_date]`, and no date appears twice (spec §8:
        /// allocator domain and ordering invariants).
        #[test]
        fn entries_stay_within_window_and_are_not_duplicated(
            required_words in 0u32..50_000u32,
            span_days in 0i64..14i64,
        ) {
            let (_dir, calendar, capacity) = fixture();
            let today = date(2026, 1, 26);
            let deadline = (today + Duration::days(span_days)).and_hms_opt(18, 0, 0).unwrap();
            let plan = allocate(&calendar, &capacity, required_words, deadline, today, false, URGENT_DAYS_THRESHOLD);

            let mut seen = std::collections::HashSet::new();
            for entry in &plan.entries {
                prop_assert!(entry.date >= today && entry.date <= deadline.date());
                prop_assert!(calendar.is_business_day(entry.date));
                prop_assert!(seen.insert(entry.date), "duplicate date in plan: {:?}", entry.date);
                prop_assert!(entry.amount > 0);
            }
        }

        /// No single day's entry ever exceeds what was actually free on that
        /// day at emission time (spec §8: capacity non-negativity as seen
        /// through the allocator).
        #[test]
        fn no_entry_exceeds_remaining_capacity_on_its_day(
            required_words in 0u32..80_000u32,
            span_days in 0i64..14i64,
        ) {
            let (_dir, calendar, capacity) = fixture();
            let today = date(2026, 1, 26);
            let deadline = (today + Duration::days(span_days)).and_hms_opt(18, 0, 0).unwrap();
            let plan = allocate(&calendar, &capacity, required_words, deadline, today, false, URGENT_DAYS_THRESHOLD);

            for entry in &plan.entries {
                let remaining = capacity.get_remaining(entry.date).unwrap();
                prop_assert!(entry.amount <= remaining);
            }
        }
    }
}
