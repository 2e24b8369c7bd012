//! # models::position
//!
//! Live positions and the archive record written when they close.
//!
//! A [`Position`] is created on fill, mutated only by the lifecycle manager
//! and archived as a [`ClosedTrade`] once it reaches [`PositionPhase::Closed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::signal::Direction;

// ─── Mode / Phase ─────────────────────────────────────────────────────────────

/// Take-profit scheme, frozen at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionMode {
    /// Exit at 1:1.
    Standard,
    /// Breakeven at 1:1, exit at 1:2.
    Enhanced,
}

impl PositionMode {
    /// Final reward in multiples of the initial risk.
    pub fn reward_multiple(self) -> f64 {
        match self {
            PositionMode::Standard => 1.0,
            PositionMode::Enhanced => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionPhase {
    Open,
    BreakevenMigrated,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    /// Migrated stop hit at entry.
    Breakeven,
}

// ─── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id:                     Uuid,
    /// Id of the order (and candidate signal) that opened this position.
    pub order_id:               Uuid,
    pub instrument:             String,
    pub direction:              Direction,
    pub entry_price:            f64,
    /// Stop at open; defines the 1R distance for the whole lifetime.
    pub initial_stop_loss_price: f64,
    pub stop_loss_price:        f64,
    pub take_profit_price:      f64,
    pub size:                   f64,
    pub contract_size:          f64,
    /// Native size of one normalized unit (pip-equivalent).
    pub price_unit:             f64,
    pub mode:                   PositionMode,
    pub phase:                  PositionPhase,
    /// Execution ticket from the broker bridge.
    pub ticket:                 Option<u64>,
    pub opened_at:              DateTime<Utc>,
    pub closed_at:              Option<DateTime<Utc>>,
}

impl Position {
    /// 1R distance in price.
    #[inline]
    pub fn risk_distance(&self) -> f64 {
        (self.entry_price - self.initial_stop_loss_price).abs()
    }

    /// Account-currency P/L if the position were closed at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry_price) * self.size * self.contract_size
    }

    /// Loss still at stake if the current stop is hit; zero once the stop sits
    /// at or beyond entry.
    pub fn open_risk(&self) -> f64 {
        if self.phase == PositionPhase::Closed {
            return 0.0;
        }
        (-self.pnl_at(self.stop_loss_price)).max(0.0)
    }
}

// ─── ClosedTrade ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position:        Position,
    pub exit_price:      f64,
    pub reason:          CloseReason,
    /// Account currency.
    pub realized_pnl:    f64,
    /// Signed move in normalized units (pips for FX).
    pub profit_units:    f64,
    /// `realized_pnl` relative to equity at week start.
    pub profit_fraction: f64,
}
