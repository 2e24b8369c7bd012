//! # models::account
//!
//! [`AccountState`] is the process-wide capital picture read by the
//! compliance gate and written on fills, closes and snapshots. The daily
//! counters live in a [`DailyLedger`] keyed by [`DayId`] and are replaced
//! wholesale at the daily boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::period::DayId;
use crate::models::position::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLedger {
    pub day_id:       DayId,
    pub start_equity: f64,
    pub realized_pnl: f64,
}

/// Gate-approved order awaiting the execution collaborator's answer. Counts
/// toward position count and open risk until it is filled or released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id:        Uuid,
    pub instrument:      String,
    pub worst_case_loss: f64,
    pub reserved_at:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub equity:             f64,
    pub balance:            f64,
    pub daily:              DailyLedger,
    pub running_max_equity: f64,
    pub open_positions:     BTreeMap<Uuid, Position>,
    #[serde(default)]
    pub pending:            BTreeMap<Uuid, Reservation>,
}

impl AccountState {
    pub fn new(equity: f64, balance: f64, day_id: DayId) -> Self {
        Self {
            equity,
            balance,
            daily: DailyLedger { day_id, start_equity: equity, realized_pnl: 0.0 },
            running_max_equity: equity,
            open_positions: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn daily_realized_pnl(&self) -> f64 {
        self.daily.realized_pnl
    }

    #[inline]
    pub fn daily_start_equity(&self) -> f64 {
        self.daily.start_equity
    }

    /// Replaces the daily ledger when `day_id` is later than the current one.
    /// Returns the previous day on a roll. An earlier day is a late event and
    /// stays booked on the current day.
    pub fn roll_day(&mut self, day_id: DayId) -> Option<DayId> {
        if day_id <= self.daily.day_id {
            return None;
        }
        let previous = self.daily.day_id;
        self.daily = DailyLedger { day_id, start_equity: self.equity, realized_pnl: 0.0 };
        Some(previous)
    }

    /// Refresh from the account snapshot provider.
    pub fn apply_snapshot(&mut self, equity: f64, balance: f64) {
        self.equity = equity;
        self.balance = balance;
        self.running_max_equity = self.running_max_equity.max(equity);
    }

    /// Book a realized P/L from a closed position.
    pub fn realize(&mut self, pnl: f64) {
        self.balance += pnl;
        self.equity += pnl;
        self.daily.realized_pnl += pnl;
        self.running_max_equity = self.running_max_equity.max(self.equity);
    }

    #[inline]
    pub fn drawdown(&self) -> f64 {
        (self.running_max_equity - self.equity).max(0.0)
    }

    /// Open plus pending positions.
    pub fn position_count(&self) -> usize {
        self.open_positions.len() + self.pending.len()
    }

    /// Loss if every open stop and every pending order's stop were hit now.
    pub fn open_risk(&self) -> f64 {
        let open: f64 = self.open_positions.values().map(Position::open_risk).sum();
        let pending: f64 = self.pending.values().map(|r| r.worst_case_loss).sum();
        open + pending
    }

    pub fn positions_for<'a>(&'a self, instrument: &'a str) -> impl Iterator<Item = &'a Position> + 'a {
        self.open_positions.values().filter(move |p| p.instrument == instrument)
    }
}
