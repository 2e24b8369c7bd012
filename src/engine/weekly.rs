//! # engine::weekly
//!
//! **Weekly Performance Tracker**: per-instrument realized profit for the
//! current week and activation of the enhanced risk/reward mode.
//!
//! All records live in one [`WeeklyBook`] keyed by [`WeekId`]; when the week
//! computed from "now" is later than the book's, the whole book is replaced.
//! Within a week `enhanced_mode_active` only ever goes `false → true`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{PeriodClock, PositionMode, WeekId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyProfitRecord {
    pub week_id:                  WeekId,
    pub realized_profit_fraction: f64,
    pub enhanced_mode_active:     bool,
    pub activation_timestamp:     Option<DateTime<Utc>>,
}

impl WeeklyProfitRecord {
    fn fresh(week_id: WeekId) -> Self {
        Self {
            week_id,
            realized_profit_fraction: 0.0,
            enhanced_mode_active:     false,
            activation_timestamp:     None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyBook {
    pub week_id:      WeekId,
    /// Equity when the week opened; denominator of every profit fraction.
    pub start_equity: f64,
    pub records:      BTreeMap<String, WeeklyProfitRecord>,
}

impl WeeklyBook {
    pub fn new(week_id: WeekId, start_equity: f64) -> Self {
        Self { week_id, start_equity, records: BTreeMap::new() }
    }
}

/// Outcome of booking one close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklyUpdate {
    pub profit_fraction: f64,
    pub week_fraction:   f64,
    /// Set when this close switched the instrument into enhanced mode.
    pub activated_at:    Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct WeeklyPerformanceTracker {
    clock:     PeriodClock,
    threshold: f64,
    book:      WeeklyBook,
}

impl WeeklyPerformanceTracker {
    pub fn new(clock: PeriodClock, threshold: f64, now: DateTime<Utc>, equity: f64) -> Self {
        Self { clock, threshold, book: WeeklyBook::new(clock.week_id(now), equity) }
    }

    /// Resume from a persisted book. A stale book is rolled on first use.
    pub fn from_book(clock: PeriodClock, threshold: f64, book: WeeklyBook) -> Self {
        Self { clock, threshold, book }
    }

    pub fn book(&self) -> &WeeklyBook {
        &self.book
    }

    pub fn week_start_equity(&self) -> f64 {
        self.book.start_equity
    }

    /// Replace the book when `now` falls in a later week. Returns the week
    /// that ended. An earlier `now` leaves the current book alone.
    pub fn roll(&mut self, now: DateTime<Utc>, equity: f64) -> Option<WeekId> {
        let week_id = self.clock.week_id(now);
        if week_id <= self.book.week_id {
            return None;
        }
        let previous = self.book.week_id;
        self.book = WeeklyBook::new(week_id, equity);
        info!(%previous, current = %week_id, start_equity = equity, "📅 Weekly book reset");
        Some(previous)
    }

    /// Book a realized close for `instrument`. `equity` seeds a new book if
    /// the close lands in a fresh week. A close stamped in an earlier week is
    /// booked into the current one.
    pub fn record_close(
        &mut self,
        instrument: &str,
        pnl:        f64,
        at:         DateTime<Utc>,
        equity:     f64,
    ) -> WeeklyUpdate {
        self.roll(at, equity);

        let profit_fraction = if self.book.start_equity > 0.0 {
            pnl / self.book.start_equity
        } else {
            0.0
        };

        let week_id = self.book.week_id;
        let record = self
            .book
            .records
            .entry(instrument.to_string())
            .or_insert_with(|| WeeklyProfitRecord::fresh(week_id));
        record.realized_profit_fraction += profit_fraction;

        let mut activated_at = None;
        if !record.enhanced_mode_active && record.realized_profit_fraction >= self.threshold {
            record.enhanced_mode_active = true;
            record.activation_timestamp = Some(at);
            activated_at = Some(at);
            info!(
                instrument,
                week     = %week_id,
                fraction = record.realized_profit_fraction,
                "🚀 Enhanced mode activated"
            );
        }

        WeeklyUpdate {
            profit_fraction,
            week_fraction: record.realized_profit_fraction,
            activated_at,
        }
    }

    /// Mode a position opened at `now` would be frozen with. A book from an
    /// earlier week reads as standard.
    pub fn current_mode(&self, instrument: &str, now: DateTime<Utc>) -> PositionMode {
        if self.clock.week_id(now) > self.book.week_id {
            return PositionMode::Standard;
        }
        match self.book.records.get(instrument) {
            Some(r) if r.enhanced_mode_active => PositionMode::Enhanced,
            _ => PositionMode::Standard,
        }
    }

    pub fn record(&self, instrument: &str) -> Option<&WeeklyProfitRecord> {
        self.book.records.get(instrument)
    }
}
