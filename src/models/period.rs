//! # models::period
//!
//! Period identifiers for the daily and weekly resets. Records that reset at a
//! boundary are keyed by one of these ids and replaced wholesale when the id
//! computed from "now" differs from the stored one.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayId(pub NaiveDate);

impl fmt::Display for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO-8601 week; weeks open on Monday at the clock's boundary hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeekId {
    pub iso_year: i32,
    pub week:     u32,
}

impl fmt::Display for WeekId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.iso_year, self.week)
    }
}

/// Maps timestamps onto [`DayId`] / [`WeekId`].
///
/// `boundary_hour_utc` shifts both boundaries, e.g. `22` puts the daily roll
/// at 22:00 UTC (FX server close) and the weekly roll at Sunday 22:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeriodClock {
    pub boundary_hour_utc: u32,
}

impl PeriodClock {
    pub fn new(boundary_hour_utc: u32) -> Self {
        Self { boundary_hour_utc }
    }

    fn shifted(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        // a 22:00 boundary means 22:00 belongs to the *next* trading day
        if self.boundary_hour_utc == 0 {
            at
        } else {
            at + Duration::hours(24 - self.boundary_hour_utc as i64)
        }
    }

    pub fn day_id(&self, at: DateTime<Utc>) -> DayId {
        DayId(self.shifted(at).date_naive())
    }

    pub fn week_id(&self, at: DateTime<Utc>) -> WeekId {
        let iso = self.shifted(at).iso_week();
        WeekId { iso_year: iso.year(), week: iso.week() }
    }
}
