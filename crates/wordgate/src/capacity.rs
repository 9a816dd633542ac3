//! Capacity store (spec component B): durable per-date used-word counts and
//! per-date cap overrides, each persisted as a JSON document and guarded by
//! an advisory file lock so two processes sharing the same storage
//! directory never lose an update.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::domain::{AllocationPlan, Date};
use crate::error::CapacityError;

pub const DEFAULT_CAP: u32 = 12_000;

pub type CapacityMap = HashMap<Date, u32>;
pub type OverrideMap = HashMap<Date, u32>;

/// Summary of what a mutating operation changed, for logging/metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub changed_dates: Vec<Date>,
    pub before: HashMap<Date, u32>,
    pub after: HashMap<Date, u32>,
}

/// Capacity and override maps, each backed by one JSON file plus a
/// process-wide mutex and an advisory OS file lock for cross-process
/// mutual exclusion on the read-modify-write cycle.
pub struct CapacityStore {
    capacity_path: PathBuf,
    overrides_path: PathBuf,
    lock_path: PathBuf,
    // Serializes same-process callers; the file lock serializes cross-process ones.
    guard: Mutex<()>,
    default_cap: u32,
}

impl CapacityStore {
    pub fn open<P: AsRef<Path>>(storage_dir: P) -> Result<Self, CapacityError> {
        let storage_dir = storage_dir.as_ref();
        fs::create_dir_all(storage_dir)?;
        Ok(Self {
            capacity_path: storage_dir.join("capacity.json"),
            overrides_path: storage_dir.join("overrides.json"),
            lock_path: storage_dir.join(".capacity.lock"),
            guard: Mutex::new(()),
            default_cap: DEFAULT_CAP,
        })
    }

    /// Overrides the per-date cap used when a date has no explicit entry in
    /// the overrides map (SPEC_FULL §3.1 `policy.default-cap`).
    pub fn with_default_cap(mut self, default_cap: u32) -> Self {
        self.default_cap = default_cap;
        self
    }

    fn acquire_lock(&self) -> Result<File, CapacityError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()
            .map_err(|_| CapacityError::LockFailed(self.lock_path.clone()))?;
        Ok(file)
    }

    fn read_map(path: &Path) -> Result<HashMap<Date, u32>, CapacityError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let map: HashMap<String, u32> = serde_json::from_str(&raw)?;
        let mut out = HashMap::new();
        for (k, v) in map {
            if let Ok(d) = Date::parse_from_str(&k, "%Y-%m-%d") {
                out.insert(d, v);
            }
        }
        Ok(out)
    }

    fn write_map(path: &Path, map: &HashMap<Date, u32>) -> Result<(), CapacityError> {
        let serializable: HashMap<String, u32> = map
            .iter()
            .map(|(d, v)| (d.format("%Y-%m-%d").to_string(), *v))
            .collect();
        let json = serde_json::to_string_pretty(&serializable)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Runs `f` with the freshly-reloaded capacity and override maps under
    /// the file lock, persists whatever `f` leaves in the capacity map, and
    /// releases the lock. This is the one read-modify-write primitive every
    /// public mutator is built on.
    fn with_locked_state<T>(
        &self,
        f: impl FnOnce(&mut CapacityMap, &mut OverrideMap) -> Result<T, CapacityError>,
    ) -> Result<T, CapacityError> {
        let _proc_guard = self.guard.lock().expect("capacity store lock poisoned");
        let _file_lock = self.acquire_lock()?;
        let mut capacity = Self::read_map(&self.capacity_path)?;
        let mut overrides = Self::read_map(&self.overrides_path)?;
        let result = f(&mut capacity, &mut overrides)?;
        Self::write_map(&self.capacity_path, &capacity)?;
        Self::write_map(&self.overrides_path, &overrides)?;
        Ok(result)
    }

    fn cap_of(&self, date: Date, overrides: &OverrideMap) -> u32 {
        overrides.get(&date).copied().unwrap_or(self.default_cap)
    }

    pub fn get_remaining(&self, date: Date) -> Result<u32, CapacityError> {
        self.with_locked_state(|capacity, overrides| {
            let cap = self.cap_of(date, overrides);
            let used = capacity.get(&date).copied().unwrap_or(0);
            Ok(cap.saturating_sub(used))
        })
    }

    pub fn apply(&self, plan: &AllocationPlan) -> Result<DiffSummary, CapacityError> {
        self.with_locked_state(|capacity, _overrides| {
            let mut summary = DiffSummary::default();
            for entry in &plan.entries {
                let before = capacity.get(&entry.date).copied().unwrap_or(0);
                let after = before + entry.amount;
                capacity.insert(entry.date, after);
                summary.changed_dates.push(entry.date);
                summary.before.insert(entry.date, before);
                summary.after.insert(entry.date, after);
            }
            Ok(summary)
        })
    }

    pub fn release(&self, plan: &AllocationPlan) -> Result<DiffSummary, CapacityError> {
        self.with_locked_state(|capacity, _overrides| {
            let mut summary = DiffSummary::default();
            for entry in &plan.entries {
                let before = capacity.get(&entry.date).copied().unwrap_or(0);
                let after = before.saturating_sub(entry.amount);
                capacity.insert(entry.date, after);
                summary.changed_dates.push(entry.date);
                summary.before.insert(entry.date, before);
                summary.after.insert(entry.date, after);
            }
            Ok(summary)
        })
    }

    pub fn adjust(&self, date: Date, signed_delta: i64) -> Result<DiffSummary, CapacityError> {
        self.with_locked_state(|capacity, _overrides| {
            let before = capacity.get(&date).copied().unwrap_or(0) as i64;
            let after = (before + signed_delta).max(0) as u32;
            capacity.insert(date, after);
            let mut summary = DiffSummary::default();
            summary.changed_dates.push(date);
            summary.before.insert(date, before as u32);
            summary.after.insert(date, after);
            Ok(summary)
        })
    }

    pub fn reset(&self) -> Result<(), CapacityError> {
        self.with_locked_state(|capacity, _overrides| {
            capacity.clear();
            Ok(())
        })
    }

    /// Recomputes the capacity map from scratch as the sum of `plans`'
    /// entries, and drops override entries dated before `today`.
    pub fn sync_with_active_tasks(
        &self,
        plans: &[AllocationPlan],
        today: Date,
    ) -> Result<DiffSummary, CapacityError> {
        self.with_locked_state(|capacity, overrides| {
            let before = capacity.clone();
            capacity.clear();
            for plan in plans {
                for entry in &plan.entries {
                    *capacity.entry(entry.date).or_insert(0) += entry.amount;
                }
            }
            overrides.retain(|d, _| *d >= today);

            let mut changed = std::collections::HashSet::new();
            changed.extend(before.keys().copied());
            changed.extend(capacity.keys().copied());
            let mut summary = DiffSummary::default();
            for d in changed {
                let b = before.get(&d).copied().unwrap_or(0);
                let a = capacity.get(&d).copied().unwrap_or(0);
                if b != a {
                    summary.changed_dates.push(d);
                    summary.before.insert(d, b);
                    summary.after.insert(d, a);
                }
            }
            summary.changed_dates.sort();
            Ok(summary)
        })
    }

    pub fn snapshot_capacity(&self) -> Result<CapacityMap, CapacityError> {
        self.with_locked_state(|capacity, _overrides| Ok(capacity.clone()))
    }

    pub fn snapshot_overrides(&self) -> Result<OverrideMap, CapacityError> {
        self.with_locked_state(|_capacity, overrides| Ok(overrides.clone()))
    }

    pub fn set_override(&self, date: Date, max_words: u32) -> Result<(), CapacityError> {
        self.with_locked_state(|_capacity, overrides| {
            overrides.insert(date, max_words);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AllocationEntry;
    use serial_test::serial;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> Date {
        Date::from_ymd_opt(y, m, d).unwrap()
    }

    fn plan(entries: &[(Date, u32)]) -> AllocationPlan {
        AllocationPlan::from_entries(
            entries
                .iter()
                .map(|(d, a)| AllocationEntry { date: *d, amount: *a })
                .collect(),
        )
    }

    #[test]
    #[serial]
    fn apply_then_release_restores_prior_state() {
        let dir = tempdir().unwrap();
        let store = CapacityStore::open(dir.path()).unwrap();
        let p = plan(&[(date(2026, 1, 28), 3000), (date(2026, 1, 29), 2000)]);
        let before = store.snapshot_capacity().unwrap();
        store.apply(&p).unwrap();
        store.release(&p).unwrap();
        let after = store.snapshot_capacity().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    #[serial]
    fn release_clamps_at_zero() {
        let dir = tempdir().unwrap();
        let store = CapacityStore::open(dir.path()).unwrap();
        let p = plan(&[(date(2026, 1, 28), 1000)]);
        store.release(&p).unwrap();
        let cap = store.snapshot_capacity().unwrap();
        assert_eq!(cap.get(&date(2026, 1, 28)).copied().unwrap_or(0), 0);
    }

    #[test]
    #[serial]
    fn get_remaining_uses_override_when_present() {
        let dir = tempdir().unwrap();
        let store = CapacityStore::open(dir.path()).unwrap();
        store.set_override(date(2026, 1, 28), 5000).unwrap();
        store.apply(&plan(&[(date(2026, 1, 28), 1000)])).unwrap();
        assert_eq!(store.get_remaining(date(2026, 1, 28)).unwrap(), 4000);
    }

    #[test]
    #[serial]
    fn with_default_cap_overrides_cap_for_dates_without_an_override() {
        let dir = tempdir().unwrap();
        let store = CapacityStore::open(dir.path()).unwrap().with_default_cap(5000);
        store.apply(&plan(&[(date(2026, 1, 28), 1000)])).unwrap();
        assert_eq!(store.get_remaining(date(2026, 1, 28)).unwrap(), 4000);

        store.set_override(date(2026, 1, 29), 200).unwrap();
        assert_eq!(store.get_remaining(date(2026, 1, 29)).unwrap(), 200);
    }

    #[test]
    #[serial]
    fn sync_with_active_tasks_recomputes_and_drops_old_overrides() {
        let dir = tempdir().unwrap();
        let store = CapacityStore::open(dir.path()).unwrap();
        store.apply(&plan(&[(date(2026, 1, 1), 9999)])).unwrap();
        store.set_override(date(2026, 1, 1), 1).unwrap();
        store.set_override(date(2026, 2, 1), 2).unwrap();

        let plans = vec![plan(&[(date(2026, 1, 28), 3000)])];
        store.sync_with_active_tasks(&plans, date(2026, 1, 28)).unwrap();

        let cap = store.snapshot_capacity().unwrap();
        assert_eq!(cap.get(&date(2026, 1, 1)), None);
        assert_eq!(cap.get(&date(2026, 1, 28)).copied(), Some(3000));

        let overrides = store.snapshot_overrides().unwrap();
        assert!(!overrides.contains_key(&date(2026, 1, 1)));
        assert!(overrides.contains_key(&date(2026, 2, 1)));
    }

    #[test]
    #[serial]
    fn adjust_never_goes_negative() {
        let dir = tempdir().unwrap();
        let store = CapacityStore::open(dir.path()).unwrap();
        store.adjust(date(2026, 1, 28), -500).unwrap();
        let cap = store.snapshot_capacity().unwrap();
        assert_eq!(cap.get(&date(2026, 1, 28)).copied().unwrap_or(0), 0);
    }
}
