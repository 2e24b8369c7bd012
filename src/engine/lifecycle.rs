//! # engine::lifecycle
//!
//! **Position Lifecycle Manager**: standard vs. enhanced take-profit, break-even
//! migration and closure.
//!
//! ```text
//!  Standard:  OPEN ──stop or 1:1──▶ CLOSED
//!  Enhanced:  OPEN ──1:1──▶ BREAKEVEN_MIGRATED ──entry or 1:2──▶ CLOSED
//!             OPEN ──stop─────────────────────────────────────▶ CLOSED
//! ```
//!
//! Every position opens with a 1:1 target; the mode frozen at open decides
//! what happens when that target is reached. An observation that crosses
//! both stop and target closes at the stop, and at most one transition is
//! taken per observation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ExecutionFailure;
use crate::models::{
    ClosedTrade, CloseReason, Direction, FillConfirmation, InstrumentSpec, Position,
    PositionMode, PositionPhase, PriceBar, SizedOrder,
};

/// Tolerance for "price reached level" comparisons.
const PRICE_EPSILON: f64 = 1e-9;

// ─── Targets ──────────────────────────────────────────────────────────────────

/// 1:1 target from entry and stop.
pub fn initial_take_profit(direction: Direction, entry: f64, stop: f64) -> f64 {
    entry + direction.sign() * (entry - stop).abs()
}

/// 1:2 target measured on the initial stop distance.
pub fn extended_take_profit(direction: Direction, entry: f64, initial_stop: f64) -> f64 {
    entry + direction.sign() * 2.0 * (entry - initial_stop).abs()
}

// ─── Observation ──────────────────────────────────────────────────────────────

/// Price range seen since the previous observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub timestamp: DateTime<Utc>,
    pub high:      f64,
    pub low:       f64,
}

impl PriceObservation {
    /// Observation covering a closed bar; stamped at the bar's close.
    pub fn from_bar(bar: &PriceBar, closes_at: DateTime<Utc>) -> Self {
        Self { timestamp: closes_at, high: bar.high, low: bar.low }
    }

    /// Single traded price.
    pub fn at(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, high: price, low: price }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LifecycleTransition {
    Hold,
    BreakevenMigrated { stop_loss_price: f64, take_profit_price: f64 },
    Closed { exit_price: f64, reason: CloseReason },
}

/// Committed result of one observation for one position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "update", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionUpdate {
    Migrated { position_id: Uuid, stop_loss_price: f64, take_profit_price: f64 },
    Closed { trade: Box<ClosedTrade> },
}

// ─── Manager ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct PositionLifecycleManager;

impl PositionLifecycleManager {
    /// Build the position for a confirmed fill. The 1:1 target is re-measured
    /// from the actual fill so slippage never skews the reward ratio.
    pub fn open(
        order: &SizedOrder,
        fill:  &FillConfirmation,
        mode:  PositionMode,
        spec:  &InstrumentSpec,
        unit:  f64,
        now:   DateTime<Utc>,
    ) -> Result<Position, ExecutionFailure> {
        if !fill.filled {
            return Err(ExecutionFailure::NotFilled("bridge reported filled=false".into()));
        }

        let direction = order.signal.direction;
        let entry     = fill.actual_entry_price;
        let stop      = order.stop_loss_price;

        let valid = entry.is_finite()
            && match direction {
                Direction::Long  => entry > stop,
                Direction::Short => entry < stop,
            };
        if !valid {
            return Err(ExecutionFailure::FillBeyondStop { fill: entry, stop });
        }

        let position = Position {
            id:                      Uuid::new_v4(),
            order_id:                order.signal.id,
            instrument:              order.signal.instrument.clone(),
            direction,
            entry_price:             entry,
            initial_stop_loss_price: stop,
            stop_loss_price:         stop,
            take_profit_price:       initial_take_profit(direction, entry, stop),
            size:                    order.position_size,
            contract_size:           spec.contract_size,
            price_unit:              unit,
            mode,
            phase:                   PositionPhase::Open,
            ticket:                  fill.ticket_id,
            opened_at:               now,
            closed_at:               None,
        };

        info!(
            instrument = %position.instrument,
            direction  = ?direction,
            entry,
            sl         = position.stop_loss_price,
            tp         = position.take_profit_price,
            size       = position.size,
            mode       = ?mode,
            "Position opened"
        );
        Ok(position)
    }

    /// Next transition for `position` given `obs`. Pure.
    pub fn observe(position: &Position, obs: &PriceObservation) -> LifecycleTransition {
        if position.phase == PositionPhase::Closed {
            return LifecycleTransition::Hold;
        }

        let (stop_hit, target_hit) = match position.direction {
            Direction::Long => (
                obs.low <= position.stop_loss_price + PRICE_EPSILON,
                obs.high >= position.take_profit_price - PRICE_EPSILON,
            ),
            Direction::Short => (
                obs.high >= position.stop_loss_price - PRICE_EPSILON,
                obs.low <= position.take_profit_price + PRICE_EPSILON,
            ),
        };

        if stop_hit {
            let reason = match position.phase {
                PositionPhase::BreakevenMigrated => CloseReason::Breakeven,
                _                                => CloseReason::StopLoss,
            };
            return LifecycleTransition::Closed { exit_price: position.stop_loss_price, reason };
        }

        if !target_hit {
            return LifecycleTransition::Hold;
        }

        match (position.mode, position.phase) {
            (PositionMode::Enhanced, PositionPhase::Open) => LifecycleTransition::BreakevenMigrated {
                stop_loss_price:   position.entry_price,
                take_profit_price: extended_take_profit(
                    position.direction,
                    position.entry_price,
                    position.initial_stop_loss_price,
                ),
            },
            _ => LifecycleTransition::Closed {
                exit_price: position.take_profit_price,
                reason:     CloseReason::TakeProfit,
            },
        }
    }

    /// Apply a migration in place. The stop only ever moves toward profit.
    pub fn apply_migration(position: &mut Position, stop_loss_price: f64, take_profit_price: f64) {
        let tightened = match position.direction {
            Direction::Long  => position.stop_loss_price.max(stop_loss_price),
            Direction::Short => position.stop_loss_price.min(stop_loss_price),
        };
        debug!(
            instrument = %position.instrument,
            from       = position.stop_loss_price,
            to         = tightened,
            tp         = take_profit_price,
            "Break-even migration"
        );
        position.stop_loss_price   = tightened;
        position.take_profit_price = take_profit_price;
        position.phase             = PositionPhase::BreakevenMigrated;
    }

    /// Close `position` and build its archive record. `week_start_equity` is
    /// the denominator of the profit fraction.
    pub fn close(
        mut position:      Position,
        exit_price:        f64,
        reason:            CloseReason,
        at:                DateTime<Utc>,
        week_start_equity: f64,
    ) -> ClosedTrade {
        position.phase     = PositionPhase::Closed;
        position.closed_at = Some(at);

        let realized_pnl = position.pnl_at(exit_price);
        let profit_units = if position.price_unit > 0.0 {
            position.direction.sign() * (exit_price - position.entry_price) / position.price_unit
        } else {
            0.0
        };
        let profit_fraction = if week_start_equity > 0.0 {
            realized_pnl / week_start_equity
        } else {
            0.0
        };

        info!(
            instrument = %position.instrument,
            reason     = ?reason,
            exit_price,
            realized_pnl,
            profit_units,
            "Position closed"
        );

        ClosedTrade { position, exit_price, reason, realized_pnl, profit_units, profit_fraction }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateSignal, InstrumentClass, RetestSignal};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap()
    }

    fn order(direction: Direction) -> SizedOrder {
        let (entry, stop, tp) = match direction {
            Direction::Long  => (1.10000, 1.09900, 1.10100),
            Direction::Short => (1.10000, 1.10100, 1.09900),
        };
        SizedOrder {
            signal: CandidateSignal::priced(
                RetestSignal {
                    instrument:   "EURUSD".into(),
                    direction,
                    break_level:  entry,
                    retest_level: entry,
                    detected_at:  t0(),
                },
                entry,
            ),
            stop_loss_price:         stop,
            take_profit_price:       tp,
            position_size:           1.0,
            risk_fraction_of_equity: 0.001,
            loss_per_lot:            100.0,
        }
    }

    fn open(direction: Direction, mode: PositionMode) -> Position {
        let spec = InstrumentSpec::new("EURUSD", InstrumentClass::Forex, 100_000.0);
        let fill = FillConfirmation { filled: true, actual_entry_price: 1.10000, ticket_id: Some(7) };
        PositionLifecycleManager::open(&order(direction), &fill, mode, &spec, 0.0001, t0()).unwrap()
    }

    fn obs(mins: i64, high: f64, low: f64) -> PriceObservation {
        PriceObservation { timestamp: t0() + Duration::minutes(mins), high, low }
    }

    #[test]
    fn opens_with_one_to_one_target() {
        let p = open(Direction::Long, PositionMode::Enhanced);
        assert!((p.take_profit_price - 1.10100).abs() < 1e-12);
        assert_eq!(p.phase, PositionPhase::Open);
        assert_eq!(p.ticket, Some(7));
    }

    #[test]
    fn standard_closes_at_one_to_one() {
        let p = open(Direction::Long, PositionMode::Standard);
        let t = PositionLifecycleManager::observe(&p, &obs(5, 1.10100, 1.10020));
        assert_eq!(
            t,
            LifecycleTransition::Closed { exit_price: p.take_profit_price, reason: CloseReason::TakeProfit }
        );

        let trade = PositionLifecycleManager::close(p, 1.10100, CloseReason::TakeProfit, t0(), 100_000.0);
        assert!((trade.realized_pnl - 100.0).abs() < 1e-6);
        assert!((trade.profit_units - 10.0).abs() < 1e-6);
        assert!((trade.profit_fraction - 0.001).abs() < 1e-9);
    }

    #[test]
    fn enhanced_migrates_then_runs_to_two_r() {
        let mut p = open(Direction::Long, PositionMode::Enhanced);

        let t = PositionLifecycleManager::observe(&p, &obs(5, 1.10100, 1.10040));
        let LifecycleTransition::BreakevenMigrated { stop_loss_price, take_profit_price } = t else {
            panic!("expected migration, got {t:?}");
        };
        assert!((stop_loss_price - 1.10000).abs() < 1e-12);
        assert!((take_profit_price - 1.10200).abs() < 1e-12);
        PositionLifecycleManager::apply_migration(&mut p, stop_loss_price, take_profit_price);
        assert_eq!(p.open_risk(), 0.0);

        let t = PositionLifecycleManager::observe(&p, &obs(10, 1.10200, 1.10120));
        assert!(matches!(t, LifecycleTransition::Closed { reason: CloseReason::TakeProfit, .. }));
    }

    #[test]
    fn migrated_position_exits_flat_on_retrace() {
        let mut p = open(Direction::Long, PositionMode::Enhanced);
        PositionLifecycleManager::apply_migration(&mut p, 1.10000, 1.10200);

        let t = PositionLifecycleManager::observe(&p, &obs(10, 1.10050, 1.09990));
        let LifecycleTransition::Closed { exit_price, reason } = t else {
            panic!("expected close, got {t:?}");
        };
        assert_eq!(reason, CloseReason::Breakeven);
        let trade = PositionLifecycleManager::close(p, exit_price, reason, t0(), 100_000.0);
        assert!(trade.realized_pnl.abs() < 1e-9);
    }

    #[test]
    fn gap_through_both_levels_assumes_stop() {
        let p = open(Direction::Long, PositionMode::Standard);
        let t = PositionLifecycleManager::observe(&p, &obs(5, 1.10150, 1.09850));
        assert_eq!(
            t,
            LifecycleTransition::Closed { exit_price: 1.09900, reason: CloseReason::StopLoss }
        );
    }

    #[test]
    fn short_standard_hits_stop() {
        let p = open(Direction::Short, PositionMode::Standard);
        assert!((p.take_profit_price - 1.09900).abs() < 1e-12);
        let t = PositionLifecycleManager::observe(&p, &obs(5, 1.10110, 1.10000));
        assert!(matches!(t, LifecycleTransition::Closed { reason: CloseReason::StopLoss, .. }));
    }

    #[test]
    fn long_stop_realizes_a_negative_pnl() {
        let p = open(Direction::Long, PositionMode::Standard);
        let t = PositionLifecycleManager::observe(&p, &obs(5, 1.10030, 1.09880));
        let LifecycleTransition::Closed { exit_price, reason } = t else {
            panic!("expected close, got {t:?}");
        };
        assert_eq!(reason, CloseReason::StopLoss);
        assert!((exit_price - 1.09900).abs() < 1e-12);

        let trade = PositionLifecycleManager::close(p, exit_price, reason, t0(), 100_000.0);
        assert!((trade.profit_units + 10.0).abs() < 1e-6);
        assert!(trade.realized_pnl < 0.0);
        assert!((trade.realized_pnl + 100.0).abs() < 1e-6);
        assert!((trade.profit_fraction + 0.001).abs() < 1e-9);
    }

    #[test]
    fn migration_never_loosens_stop() {
        let mut p = open(Direction::Long, PositionMode::Enhanced);
        p.stop_loss_price = 1.10050;
        PositionLifecycleManager::apply_migration(&mut p, 1.10000, 1.10200);
        assert!((p.stop_loss_price - 1.10050).abs() < 1e-12);
    }

    #[test]
    fn fill_beyond_stop_is_refused() {
        let spec = InstrumentSpec::new("EURUSD", InstrumentClass::Forex, 100_000.0);
        let fill = FillConfirmation { filled: true, actual_entry_price: 1.09850, ticket_id: None };
        let res = PositionLifecycleManager::open(
            &order(Direction::Long), &fill, PositionMode::Standard, &spec, 0.0001, t0(),
        );
        assert!(matches!(res, Err(ExecutionFailure::FillBeyondStop { .. })));
    }
}
