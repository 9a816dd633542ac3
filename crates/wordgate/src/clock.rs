//! Injectable wall-clock + team time zone, threaded explicitly through the
//! calendar, acceptance engine, and metrics collector instead of read from a
//! process-global. Lets tests pin "now" and the zone without sleeping or
//! mutating the environment.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Team-local wall clock. `Clock::system` wraps `Utc::now()`; tests use
/// `Clock::fixed` to pin an instant.
#[derive(Debug, Clone)]
pub struct Clock {
    tz: Tz,
    fixed: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn system(tz: Tz) -> Self {
        Self { tz, fixed: None }
    }

    pub fn fixed(tz: Tz, at: DateTime<Utc>) -> Self {
        Self { tz, fixed: Some(at) }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.fixed.unwrap_or_else(Utc::now)
    }

    /// The current instant expressed as a naive local datetime in the team
    /// zone — the representation the calendar and acceptance engine compare
    /// deadlines against.
    pub fn now_local(&self) -> NaiveDateTime {
        self.now_utc().with_timezone(&self.tz).naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date()
    }

    /// Parse a team-local IANA zone name, falling back to UTC for an
    /// unrecognized string rather than failing config load outright.
    pub fn parse_tz(name: &str) -> Tz {
        name.parse::<Tz>().unwrap_or(chrono_tz::UTC)
    }
}
