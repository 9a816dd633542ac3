//! Business-day calendar (spec component A).
//!
//! `isBusinessDay` is a pure function of a date plus the current holiday
//! sets; the sets are loaded from `holidays.json` and re-read whenever the
//! file's modification time changes, so a long-lived process picks up
//! operator edits without a restart.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::Date;
use crate::error::CalendarError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HolidayFile {
    #[serde(rename = "extraHolidays", default)]
    extra_holidays: Vec<String>,
    #[serde(rename = "workingHolidays", default)]
    working_holidays: Vec<String>,
}

#[derive(Debug, Default, Clone)]
struct HolidaySets {
    /// date -> human name, for dates explicitly closed.
    extra: std::collections::HashMap<NaiveDate, Option<String>>,
    /// dates forced open despite falling in `extra` or on a weekend... no,
    /// still subject to weekends per spec.
    working: HashSet<NaiveDate>,
}

struct Loaded {
    sets: HolidaySets,
    mtime: Option<SystemTime>,
}

/// Process-wide, thread-safe holiday calendar backed by a JSON file.
pub struct Calendar {
    path: PathBuf,
    state: RwLock<Loaded>,
}

impl Calendar {
    /// Opens (or lazily creates on first access) the holiday file at `path`.
    /// A missing file is treated as an empty calendar, not an error.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, CalendarError> {
        let path = path.into();
        let loaded = Self::load(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(loaded),
        })
    }

    fn load(path: &Path) -> Result<Loaded, CalendarError> {
        if !path.exists() {
            return Ok(Loaded {
                sets: HolidaySets::default(),
                mtime: None,
            });
        }
        let mtime = fs::metadata(path).ok().and_then(|m| m.modified().ok());
        let content = fs::read_to_string(path)?;
        let file: HolidayFile = serde_json::from_str(&content)?;
        let mut extra = std::collections::HashMap::new();
        for raw in &file.extra_holidays {
            if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                extra.insert(d, None);
            }
        }
        let working = file
            .working_holidays
            .iter()
            .filter_map(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
            .collect();
        Ok(Loaded {
            sets: HolidaySets { extra, working },
            mtime,
        })
    }

    /// Re-reads the backing file iff its modification time has advanced
    /// since the last load. Cheap on the common no-change path (one
    /// `fs::metadata` call).
    fn refresh_if_stale(&self) -> Result<(), CalendarError> {
        let current_mtime = if self.path.exists() {
            fs::metadata(&self.path).ok().and_then(|m| m.modified().ok())
        } else {
            None
        };
        let needs_reload = {
            let guard = self.state.read().expect("calendar lock poisoned");
            current_mtime != guard.mtime
        };
        if needs_reload {
            let fresh = Self::load(&self.path)?;
            *self.state.write().expect("calendar lock poisoned") = fresh;
        }
        Ok(())
    }

    pub fn is_business_day(&self, d: Date) -> bool {
        self.refresh_if_stale().ok();
        let guard = self.state.read().expect("calendar lock poisoned");
        is_business_day_with(&guard.sets, d)
    }

    pub fn holiday_name(&self, d: Date) -> Option<String> {
        self.refresh_if_stale().ok();
        let guard = self.state.read().expect("calendar lock poisoned");
        guard.sets.extra.get(&d).cloned().flatten()
    }
}

fn is_weekend(d: Date) -> bool {
    matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

fn is_business_day_with(sets: &HolidaySets, d: Date) -> bool {
    if is_weekend(d) {
        return false;
    }
    if sets.extra.contains_key(&d) && !sets.working.contains(&d) {
        return false;
    }
    true
}
