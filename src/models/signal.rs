//! # models::signal
//!
//! The objects that flow linearly through the pipeline:
//!
//! ```text
//! RetestSignal ──trigger──▶ CandidateSignal ──sizer──▶ SizedOrder ──gate──▶ OrderRequest
//! ```
//!
//! Each is produced once and consumed once; none of them is shared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Direction ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// `+1.0` for long, `-1.0` for short.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long  => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long  => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// MT5 order action.
    pub fn action(self) -> &'static str {
        match self {
            Direction::Long  => "BUY",
            Direction::Short => "SELL",
        }
    }
}

// ─── RetestSignal ─────────────────────────────────────────────────────────────

/// Emitted by the structure detector on a validated retest; not yet priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetestSignal {
    pub instrument:   String,
    pub direction:    Direction,
    pub break_level:  f64,
    pub retest_level: f64,
    pub detected_at:  DateTime<Utc>,
}

// ─── CandidateSignal ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub id:            Uuid,
    pub instrument:    String,
    pub direction:     Direction,
    pub break_level:   f64,
    pub retest_level:  f64,
    pub trigger_price: f64,
    pub detected_at:   DateTime<Utc>,
}

impl CandidateSignal {
    pub fn priced(retest: RetestSignal, trigger_price: f64) -> Self {
        Self {
            id:            Uuid::new_v4(),
            instrument:    retest.instrument,
            direction:     retest.direction,
            break_level:   retest.break_level,
            retest_level:  retest.retest_level,
            trigger_price,
            detected_at:   retest.detected_at,
        }
    }
}

// ─── SizedOrder ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedOrder {
    pub signal:                  CandidateSignal,
    pub stop_loss_price:         f64,
    pub take_profit_price:       f64,
    pub position_size:           f64,
    /// Loss of `size × loss_per_lot / equity` at the stop, after lot rounding.
    pub risk_fraction_of_equity: f64,
    /// Account-currency loss of one lot if the stop is hit.
    pub loss_per_lot:            f64,
}

impl SizedOrder {
    #[inline]
    pub fn entry_price(&self) -> f64 {
        self.signal.trigger_price
    }

    #[inline]
    pub fn stop_distance(&self) -> f64 {
        (self.entry_price() - self.stop_loss_price).abs()
    }

    #[inline]
    pub fn worst_case_loss(&self) -> f64 {
        self.position_size * self.loss_per_lot
    }

    /// Same order at a smaller size, as proposed by the compliance gate.
    pub fn resized(&self, size: f64, equity: f64) -> Self {
        let mut order = self.clone();
        order.position_size = size;
        order.risk_fraction_of_equity = if equity > 0.0 {
            size * self.loss_per_lot / equity
        } else {
            0.0
        };
        order
    }

    pub fn to_request(&self) -> OrderRequest {
        OrderRequest {
            order_id:    self.signal.id,
            instrument:  self.signal.instrument.clone(),
            direction:   self.signal.direction,
            entry_price: self.entry_price(),
            stop_loss:   self.stop_loss_price,
            take_profit: self.take_profit_price,
            size:        self.position_size,
        }
    }
}

// ─── Execution boundary ───────────────────────────────────────────────────────

/// Outbound order handed to the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id:    Uuid,
    pub instrument:  String,
    pub direction:   Direction,
    pub entry_price: f64,
    pub stop_loss:   f64,
    pub take_profit: f64,
    pub size:        f64,
}

/// Fill confirmation returned by the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillConfirmation {
    pub filled:             bool,
    pub actual_entry_price: f64,
    pub ticket_id:          Option<u64>,
}
