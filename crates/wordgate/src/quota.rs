//! Word-quota rotation file (spec §6, expanded in SPEC_FULL §4): a secondary
//! intraday word counter, independent of the daily capacity map, keyed by a
//! rolling window that resets at a configured hour each day and tracks
//! which alert thresholds have already fired so operators are paged once
//! per crossing rather than on every subsequent task.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CapacityError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct QuotaFile {
    #[serde(flatten)]
    counts: HashMap<String, serde_json::Value>,
}

pub struct WordQuota {
    path: PathBuf,
    reset_hour: u32,
    guard: Mutex<()>,
}

impl WordQuota {
    pub fn open<P: AsRef<Path>>(storage_dir: P, reset_hour: u32) -> Self {
        Self { path: storage_dir.as_ref().join("wordQuota.json"), reset_hour, guard: Mutex::new(()) }
    }

    /// `YYYY-MM-DD-<resetHour>h`, the window a wall-clock instant belongs
    /// to: before `reset_hour` it's the previous calendar day's window.
    pub fn window_key(&self, now: NaiveDateTime) -> String {
        let window_date = if now.hour() < self.reset_hour { now.date() - chrono::Duration::days(1) } else { now.date() };
        format!("{}-{}h", window_date.format("%Y-%m-%d"), self.reset_hour)
    }

    fn read(&self) -> Result<QuotaFile, CapacityError> {
        if !self.path.exists() {
            return Ok(QuotaFile::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(QuotaFile::default());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, file: &QuotaFile) -> Result<(), CapacityError> {
        let json = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Adds `words` to the current window's count, dropping any window key
    /// that isn't `key` (the file rotates to hold only the active window).
    pub fn add(&self, key: &str, words: u32) -> Result<u32, CapacityError> {
        let _guard = self.guard.lock().expect("word quota lock poisoned");
        let mut file = self.read()?;
        file.counts.retain(|k, _| k == key || k == &format!("{key}_alertedSteps"));
        let current = file.counts.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let updated = current + words;
        file.counts.insert(key.to_string(), serde_json::json!(updated));
        self.write(&file)?;
        Ok(updated)
    }

    pub fn get(&self, key: &str) -> Result<u32, CapacityError> {
        let _guard = self.guard.lock().expect("word quota lock poisoned");
        let file = self.read()?;
        Ok(file.counts.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32)
    }

    /// Returns the alert steps already signalled for `key`'s window.
    pub fn alerted_steps(&self, key: &str) -> Result<Vec<u32>, CapacityError> {
        let _guard = self.guard.lock().expect("word quota lock poisoned");
        let file = self.read()?;
        let steps_key = format!("{key}_alertedSteps");
        Ok(file
            .counts
            .get(&steps_key)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect())
            .unwrap_or_default())
    }

    /// Records `step` as alerted for `key`'s window if it isn't already,
    /// returning whether this call actually added it (i.e. whether the
    /// caller should page operators now).
    pub fn mark_alerted(&self, key: &str, step: u32) -> Result<bool, CapacityError> {
        let _guard = self.guard.lock().expect("word quota lock poisoned");
        let mut file = self.read()?;
        let steps_key = format!("{key}_alertedSteps");
        let mut steps: Vec<u32> = file
            .counts
            .get(&steps_key)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect())
            .unwrap_or_default();
        if steps.contains(&step) {
            return Ok(false);
        }
        steps.push(step);
        file.counts.insert(steps_key, serde_json::json!(steps));
        self.write(&file)?;
        Ok(true)
    }
}
