//! Capacity history (spec §6, expanded in SPEC_FULL §4): an append-only log
//! of every successful capacity allocation, trimmed to the last 90 days on
//! each write. Distinct from [`crate::capacity::CapacityStore`]: this file
//! is a record for operators, not load-bearing state the coordinator reads
//! back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Date;
use crate::error::CapacityError;

pub const RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub date: Date,
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "allocatedWords")]
    pub allocated_words: u32,
    #[serde(rename = "completionTimeMs")]
    pub completion_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct CapacityHistory {
    path: PathBuf,
    guard: Mutex<()>,
}

impl CapacityHistory {
    pub fn open<P: AsRef<Path>>(storage_dir: P) -> Self {
        Self { path: storage_dir.as_ref().join("capacityHistory.json"), guard: Mutex::new(()) }
    }

    fn read_all(&self) -> Result<Vec<HistoryRecord>, CapacityError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Appends `record` and drops entries older than [`RETENTION_DAYS`]
    /// relative to `today`.
    pub fn append(&self, record: HistoryRecord, today: Date) -> Result<(), CapacityError> {
        let _guard = self.guard.lock().expect("capacity history lock poisoned");
        let mut records = self.read_all()?;
        records.push(record);
        let cutoff = today - chrono::Duration::days(RETENTION_DAYS);
        records.retain(|r| r.date >= cutoff);
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<HistoryRecord>, CapacityError> {
        let _guard = self.guard.lock().expect("capacity history lock poisoned");
        self.read_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> Date {
        Date::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(date: Date, order_id: &str) -> HistoryRecord {
        HistoryRecord {
            date,
            order_id: order_id.to_string(),
            allocated_words: 1000,
            completion_time_ms: 5000,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn append_accumulates_records() {
        let dir = tempdir().unwrap();
        let history = CapacityHistory::open(dir.path());
        history.append(record(date(2026, 1, 28), "ORD-1"), date(2026, 1, 28)).unwrap();
        history.append(record(date(2026, 1, 29), "ORD-2"), date(2026, 1, 29)).unwrap();
        let all = history.load().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn append_trims_entries_older_than_retention_window() {
        let dir = tempdir().unwrap();
        let history = CapacityHistory::open(dir.path());
        history.append(record(date(2025, 1, 1), "OLD"), date(2025, 1, 1)).unwrap();
        history.append(record(date(2026, 1, 28), "NEW"), date(2026, 1, 28)).unwrap();
        let all = history.load().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].order_id, "NEW");
    }
}
