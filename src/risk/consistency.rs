//! # risk::consistency
//!
//! Per-day realized profit over a rolling window, backing the consistency
//! rule: no single day should carry more than a configured fraction of the
//! window's total profit.
//!
//! The rule can only be judged in hindsight, so [`ConsistencyLedger::evaluate`]
//! is the authoritative period-end check and
//! [`ConsistencyLedger::projected_breach`] is the advisory the gate attaches at
//! open time.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::DayId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyLedger {
    pub window_days: u32,
    pub days:        BTreeMap<NaiveDate, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub best_day:        Option<NaiveDate>,
    pub best_day_profit: f64,
    pub total_profit:    f64,
    /// `best_day_profit / total_profit`, zero when the window is not in profit.
    pub ratio:           f64,
    pub breached:        bool,
}

impl ConsistencyLedger {
    pub fn new(window_days: u32) -> Self {
        Self { window_days: window_days.max(1), days: BTreeMap::new() }
    }

    fn window_start(&self, today: DayId) -> NaiveDate {
        today.0 - Duration::days(self.window_days.saturating_sub(1) as i64)
    }

    /// Apply a new window length and drop days that fell out of it.
    pub fn resize_window(&mut self, window_days: u32, today: DayId) {
        self.window_days = window_days.max(1);
        self.prune(today);
    }

    pub fn record(&mut self, day: DayId, pnl: f64) {
        *self.days.entry(day.0).or_insert(0.0) += pnl;
    }

    /// Drop days that fell out of the window ending at `today`.
    pub fn prune(&mut self, today: DayId) {
        let start = self.window_start(today);
        self.days.retain(|day, _| *day >= start);
    }

    fn in_window(&self, today: DayId) -> impl Iterator<Item = (&NaiveDate, &f64)> {
        let start = self.window_start(today);
        self.days.range(start..=today.0)
    }

    pub fn day_profit(&self, day: DayId) -> f64 {
        self.days.get(&day.0).copied().unwrap_or(0.0)
    }

    /// Period-end evaluation over the window ending at `today`.
    pub fn evaluate(&self, today: DayId, fraction: f64) -> ConsistencyReport {
        let mut total = 0.0;
        let mut best: Option<(NaiveDate, f64)> = None;
        for (day, pnl) in self.in_window(today) {
            total += pnl;
            if *pnl > 0.0 && best.map_or(true, |(_, b)| *pnl > b) {
                best = Some((*day, *pnl));
            }
        }

        let best_day_profit = best.map_or(0.0, |(_, p)| p);
        let ratio = if total > 0.0 { best_day_profit / total } else { 0.0 };
        ConsistencyReport {
            best_day: best.map(|(d, _)| d),
            best_day_profit,
            total_profit: total,
            ratio,
            breached: total > 0.0 && ratio > fraction,
        }
    }

    /// Would adding `potential_profit` to today make today the single largest
    /// day above `fraction` of the window's profit? Returns the projected
    /// report when it would.
    pub fn projected_breach(
        &self,
        today:            DayId,
        potential_profit: f64,
        fraction:         f64,
    ) -> Option<ConsistencyReport> {
        if !(potential_profit > 0.0) {
            return None;
        }

        let mut total = potential_profit;
        let mut best_other = 0.0_f64;
        for (day, pnl) in self.in_window(today) {
            total += pnl;
            if *day != today.0 {
                best_other = best_other.max(*pnl);
            }
        }

        let projected_today = self.day_profit(today) + potential_profit;
        if total <= 0.0 || projected_today < best_other {
            return None;
        }

        let ratio = projected_today / total;
        (ratio > fraction).then(|| ConsistencyReport {
            best_day:        Some(today.0),
            best_day_profit: projected_today,
            total_profit:    total,
            ratio,
            breached:        true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> DayId {
        DayId(NaiveDate::from_ymd_opt(2026, 3, d).unwrap())
    }

    #[test]
    fn evaluates_best_day_share() {
        let mut ledger = ConsistencyLedger::new(30);
        ledger.record(day(2), 1_000.0);
        ledger.record(day(3), 1_000.0);
        ledger.record(day(4), 3_000.0);
        ledger.record(day(5), -500.0);

        let report = ledger.evaluate(day(6), 0.30);
        assert_eq!(report.best_day, Some(day(4).0));
        assert!((report.total_profit - 4_500.0).abs() < 1e-9);
        assert!(report.breached);

        let report = ledger.evaluate(day(6), 0.70);
        assert!(!report.breached);
    }

    #[test]
    fn window_excludes_old_days() {
        let mut ledger = ConsistencyLedger::new(3);
        ledger.record(day(1), 10_000.0);
        ledger.record(day(5), 1_000.0);
        ledger.record(day(6), 1_000.0);

        let report = ledger.evaluate(day(6), 0.60);
        assert_eq!(report.total_profit, 2_000.0);
        assert!(!report.breached);

        ledger.prune(day(6));
        assert!(!ledger.days.contains_key(&day(1).0));
    }

    #[test]
    fn projected_breach_flags_outsized_day() {
        let mut ledger = ConsistencyLedger::new(30);
        ledger.record(day(2), 1_000.0);
        ledger.record(day(3), 1_000.0);
        ledger.record(day(4), 1_000.0);

        assert!(ledger.projected_breach(day(5), 200.0, 0.30).is_none());
        let report = ledger.projected_breach(day(5), 2_000.0, 0.30).unwrap();
        assert!((report.ratio - 0.4).abs() < 1e-9);
        assert!(ledger.projected_breach(day(5), -100.0, 0.30).is_none());
    }
}
