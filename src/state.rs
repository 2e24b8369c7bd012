//! # state
//!
//! The **Desk**: single writer of everything the pipelines share: the
//! [`AccountState`], the weekly book and the consistency ledger.
//!
//! ## Discipline
//!
//! * One `tokio::sync::RwLock<Ledger>`. Gate evaluation and the reservation
//!   it grants happen under one write guard, so two instruments can never be
//!   approved against the same headroom.
//! * Fill and close commits mutate a clone of the ledger and swap it in only
//!   once every step succeeded.
//! * The execution call happens outside the lock; the reservation keeps the
//!   order's risk counted until it is filled or released.
//! * Period rolls ([`DayId`] / [`WeekId`]) are applied lazily by whichever
//!   write arrives first in the new period, and only ever move forward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::{
    LifecycleTransition, PositionLifecycleManager, PositionUpdate, PriceObservation,
};
use crate::engine::pipeline::FeedRouter;
use crate::engine::weekly::{WeeklyBook, WeeklyPerformanceTracker};
use crate::error::{ExecutionFailure, PipelineError};
use crate::events::{Journal, PipelineEvent};
use crate::models::{
    AccountState, FillConfirmation, InstrumentRegistry, PeriodClock, Position, PositionMode,
    Reservation, SizedOrder,
};
use crate::risk::{
    Advisory, ComplianceDecision, ComplianceGate, ComplianceLimits, ComplianceRule,
    ConsistencyLedger, ConsistencyReport, GateInput,
};
use crate::store::PersistedState;

// ─── Ledger ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Ledger {
    pub account:     AccountState,
    pub weekly:      WeeklyPerformanceTracker,
    pub consistency: ConsistencyLedger,
}

impl Ledger {
    pub fn fresh(
        equity:           f64,
        now:              DateTime<Utc>,
        clock:            PeriodClock,
        weekly_threshold: f64,
        window_days:      u32,
    ) -> Self {
        Self {
            account:     AccountState::new(equity, equity, clock.day_id(now)),
            weekly:      WeeklyPerformanceTracker::new(clock, weekly_threshold, now, equity),
            consistency: ConsistencyLedger::new(window_days),
        }
    }

    /// Resume from a saved state. The configured thresholds and window win
    /// over whatever was in force when the state was written.
    pub fn restore(
        state:            PersistedState,
        clock:            PeriodClock,
        weekly_threshold: f64,
        window_days:      u32,
    ) -> Self {
        let mut consistency = state.consistency;
        consistency.resize_window(window_days, state.account.daily.day_id);
        Self {
            account:     state.account,
            weekly:      WeeklyPerformanceTracker::from_book(clock, weekly_threshold, state.weekly),
            consistency,
        }
    }

    /// Advance period records when `now` falls in a later day or week. Events
    /// stamped earlier than the current period stay booked on it.
    fn roll_periods(&mut self, clock: &PeriodClock, now: DateTime<Utc>, journal: &Journal) {
        let today = clock.day_id(now);
        if let Some(previous) = self.account.roll_day(today) {
            self.consistency.prune(today);
            info!(%previous, current = %today, "📅 Daily ledger reset");
            journal.publish(PipelineEvent::DailyReset { previous, current: today });
        }

        let equity = self.account.equity;
        if let Some(previous) = self.weekly.roll(now, equity) {
            journal.publish(PipelineEvent::WeeklyReset { previous, current: self.weekly.book().week_id });
        }
    }
}

// ─── Desk ─────────────────────────────────────────────────────────────────────

/// Gate-approved order holding a reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedOrder {
    pub order:       SizedOrder,
    pub mode:        PositionMode,
    pub modified_by: Option<ComplianceRule>,
    pub advisories:  Vec<Advisory>,
}

/// Read-only view for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DeskSnapshot {
    pub account:     AccountState,
    pub drawdown:    f64,
    pub open_risk:   f64,
    pub weekly:      WeeklyBook,
    pub consistency: ConsistencyReport,
    pub limits:      ComplianceLimits,
}

pub struct Desk {
    ledger:   RwLock<Ledger>,
    gate:     ComplianceGate,
    clock:    PeriodClock,
    registry: Arc<InstrumentRegistry>,
    journal:  Journal,
}

impl Desk {
    pub fn new(
        ledger:   Ledger,
        gate:     ComplianceGate,
        clock:    PeriodClock,
        registry: Arc<InstrumentRegistry>,
        journal:  Journal,
    ) -> Self {
        Self { ledger: RwLock::new(ledger), gate, clock, registry, journal }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    pub async fn equity(&self) -> f64 {
        self.ledger.read().await.account.equity
    }

    pub async fn current_mode(&self, instrument: &str, now: DateTime<Utc>) -> PositionMode {
        self.ledger.read().await.weekly.current_mode(instrument, now)
    }

    // ─── Gate + reservation ──────────────────────────────────────────────────

    /// Run the compliance gate and, on approval, reserve the order's risk.
    pub async fn submit(
        &self,
        order: SizedOrder,
        now:   DateTime<Utc>,
    ) -> Result<ApprovedOrder, PipelineError> {
        let mut ledger = self.ledger.write().await;
        ledger.roll_periods(&self.clock, now, &self.journal);

        let instrument = order.signal.instrument.clone();
        let order_id   = order.signal.id;
        let spec       = self.registry.spec(&instrument)?;
        let mode       = ledger.weekly.current_mode(&instrument, now);

        let assessment = self.gate.evaluate(&GateInput {
            account:     &ledger.account,
            order:       &order,
            spec,
            consistency: &ledger.consistency,
            today:       ledger.account.daily.day_id,
            mode,
        });

        let (order, modified_by) = match assessment.decision {
            ComplianceDecision::Approved => (order, None),
            ComplianceDecision::Modified { size, rule, .. } => {
                let resized = order.resized(size, ledger.account.equity);
                (resized, Some(rule))
            }
            ComplianceDecision::Rejected(reason) => {
                self.journal.publish(PipelineEvent::ComplianceRejected {
                    order_id,
                    instrument,
                    reason: reason.to_string(),
                });
                return Err(reason.into());
            }
        };

        ledger.account.pending.insert(order_id, Reservation {
            order_id,
            instrument:      instrument.clone(),
            worst_case_loss: order.worst_case_loss(),
            reserved_at:     now,
        });

        self.journal.publish(PipelineEvent::OrderApproved {
            order_id,
            instrument,
            size:          order.position_size,
            risk_fraction: order.risk_fraction_of_equity,
            mode,
            modified_by,
            advisories:    assessment.advisories.clone(),
        });

        Ok(ApprovedOrder { order, mode, modified_by, advisories: assessment.advisories })
    }

    /// Turn a reservation into an open position. On failure the reservation
    /// is released and the ledger is otherwise untouched.
    pub async fn commit_fill(
        &self,
        approved: &ApprovedOrder,
        fill:     &FillConfirmation,
        now:      DateTime<Utc>,
    ) -> Result<Position, PipelineError> {
        let order_id   = approved.order.signal.id;
        let instrument = approved.order.signal.instrument.clone();
        let mut ledger = self.ledger.write().await;

        let mut draft = ledger.clone();
        if draft.account.pending.remove(&order_id).is_none() {
            return Err(ExecutionFailure::UnknownReservation(order_id).into());
        }

        let opened = self.registry.spec(&instrument).map_err(PipelineError::from).and_then(|spec| {
            let unit = self.registry.unit_of(&instrument)?;
            PositionLifecycleManager::open(&approved.order, fill, approved.mode, spec, unit, now)
                .map_err(PipelineError::from)
        });

        match opened {
            Ok(position) => {
                draft.account.open_positions.insert(position.id, position.clone());
                *ledger = draft;
                self.journal.publish(PipelineEvent::PositionOpened { position: Box::new(position.clone()) });
                Ok(position)
            }
            Err(err) => {
                ledger.account.pending.remove(&order_id);
                warn!(%order_id, %instrument, error = %err, "❌ Fill could not be committed");
                self.journal.publish(PipelineEvent::ExecutionFailed {
                    order_id,
                    instrument,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Drop the reservation of an order the execution collaborator refused.
    pub async fn release(&self, order_id: Uuid, failure: &ExecutionFailure) {
        let mut ledger = self.ledger.write().await;
        let Some(reservation) = ledger.account.pending.remove(&order_id) else {
            return;
        };
        warn!(%order_id, instrument = %reservation.instrument, error = %failure, "❌ Execution failed — reservation released");
        self.journal.publish(PipelineEvent::ExecutionFailed {
            order_id,
            instrument: reservation.instrument,
            reason:     failure.to_string(),
        });
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Feed one observation to every open position on `instrument` and commit
    /// the resulting migrations and closes in one swap.
    pub async fn observe(&self, instrument: &str, obs: PriceObservation) -> Vec<PositionUpdate> {
        let mut ledger = self.ledger.write().await;
        ledger.roll_periods(&self.clock, obs.timestamp, &self.journal);

        let ids: Vec<Uuid> = ledger.account.positions_for(instrument).map(|p| p.id).collect();
        if ids.is_empty() {
            return Vec::new();
        }

        let mut draft   = ledger.clone();
        let mut updates = Vec::new();
        let mut events  = Vec::new();
        let today       = ledger.account.daily.day_id;

        for id in ids {
            let Some(position) = draft.account.open_positions.get_mut(&id) else {
                continue;
            };
            match PositionLifecycleManager::observe(position, &obs) {
                LifecycleTransition::Hold => {}
                LifecycleTransition::BreakevenMigrated { stop_loss_price, take_profit_price } => {
                    PositionLifecycleManager::apply_migration(position, stop_loss_price, take_profit_price);
                    events.push(PipelineEvent::BreakevenMigrated {
                        position_id:       id,
                        instrument:        instrument.to_string(),
                        stop_loss_price:   position.stop_loss_price,
                        take_profit_price: position.take_profit_price,
                    });
                    updates.push(PositionUpdate::Migrated {
                        position_id:       id,
                        stop_loss_price:   position.stop_loss_price,
                        take_profit_price: position.take_profit_price,
                    });
                }
                LifecycleTransition::Closed { exit_price, reason } => {
                    let Some(position) = draft.account.open_positions.remove(&id) else {
                        continue;
                    };
                    let week_equity = draft.weekly.week_start_equity();
                    let trade = PositionLifecycleManager::close(
                        position, exit_price, reason, obs.timestamp, week_equity,
                    );

                    draft.account.realize(trade.realized_pnl);
                    draft.consistency.record(today, trade.realized_pnl);
                    let equity = draft.account.equity;
                    let update = draft.weekly.record_close(instrument, trade.realized_pnl, obs.timestamp, equity);

                    if let Some(at) = update.activated_at {
                        events.push(PipelineEvent::EnhancedModeActivated {
                            instrument: instrument.to_string(),
                            week_id:    draft.weekly.book().week_id,
                            fraction:   update.week_fraction,
                            at,
                        });
                    }
                    events.push(PipelineEvent::PositionClosed { trade: Box::new(trade.clone()) });
                    updates.push(PositionUpdate::Closed { trade: Box::new(trade) });
                }
            }
        }

        *ledger = draft;
        drop(ledger);

        for event in events {
            self.journal.publish(event);
        }
        updates
    }

    // ─── Account feed ────────────────────────────────────────────────────────

    pub async fn apply_snapshot(&self, equity: f64, balance: f64, now: DateTime<Utc>) {
        let mut ledger = self.ledger.write().await;
        ledger.roll_periods(&self.clock, now, &self.journal);
        ledger.account.apply_snapshot(equity, balance);
        let drawdown = ledger.account.drawdown();
        self.journal.publish(PipelineEvent::AccountSnapshot { equity, balance, drawdown });
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub async fn snapshot(&self, now: DateTime<Utc>) -> DeskSnapshot {
        let ledger = self.ledger.read().await;
        let limits = *self.gate.limits();
        DeskSnapshot {
            account:     ledger.account.clone(),
            drawdown:    ledger.account.drawdown(),
            open_risk:   ledger.account.open_risk(),
            weekly:      ledger.weekly.book().clone(),
            consistency: ledger.consistency.evaluate(self.clock.day_id(now), limits.consistency_rule_fraction),
            limits,
        }
    }

    pub async fn persisted(&self, now: DateTime<Utc>) -> PersistedState {
        let ledger = self.ledger.read().await;
        PersistedState::new(
            now,
            ledger.account.clone(),
            ledger.weekly.book().clone(),
            ledger.consistency.clone(),
        )
    }
}

// ─── AppState ─────────────────────────────────────────────────────────────────

/// Top-level shared state injected into every Axum handler.
pub struct AppState {
    pub desk:       Arc<Desk>,
    pub feeds:      FeedRouter,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(desk: Arc<Desk>, feeds: FeedRouter) -> Self {
        Self { desk, feeds, started_at: Utc::now() }
    }
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComplianceRejection;
    use crate::models::{CandidateSignal, Direction, PositionPhase, RetestSignal};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn limits() -> ComplianceLimits {
        ComplianceLimits {
            daily_loss_limit_fraction: 0.05,
            max_drawdown_fraction:     0.10,
            risk_ceiling_fraction:     0.0055,
            max_concurrent_positions:  2,
            max_open_risk_fraction:    0.02,
            consistency_rule_fraction: 0.30,
        }
    }

    fn ledger_at(now: DateTime<Utc>) -> Ledger {
        Ledger::fresh(100_000.0, now, PeriodClock::new(0), 0.10, 30)
    }

    fn desk_with(ledger: Ledger) -> Desk {
        let registry = InstrumentRegistry::new(
            InstrumentRegistry::default_specs(),
            InstrumentRegistry::default_class_units(),
        )
        .unwrap();
        Desk::new(
            ledger,
            ComplianceGate::new(limits()),
            PeriodClock::new(0),
            Arc::new(registry),
            Journal::new(64),
        )
    }

    fn desk() -> Desk {
        desk_with(ledger_at(t0()))
    }

    fn order(instrument: &str) -> SizedOrder {
        SizedOrder {
            signal: CandidateSignal::priced(
                RetestSignal {
                    instrument:   instrument.into(),
                    direction:    Direction::Long,
                    break_level:  1.1,
                    retest_level: 1.1,
                    detected_at:  t0(),
                },
                1.10000,
            ),
            stop_loss_price:         1.09900,
            take_profit_price:       1.10100,
            position_size:           5.5,
            risk_fraction_of_equity: 0.0055,
            loss_per_lot:            100.0,
        }
    }

    fn fill() -> FillConfirmation {
        FillConfirmation { filled: true, actual_entry_price: 1.10000, ticket_id: Some(1) }
    }

    #[tokio::test]
    async fn reservations_count_toward_position_limit() {
        let desk = desk();
        desk.submit(order("EURUSD"), t0()).await.unwrap();
        desk.submit(order("GBPUSD"), t0()).await.unwrap();
        let third = desk.submit(order("AUDUSD"), t0()).await;
        assert!(matches!(third, Err(PipelineError::Compliance(_))));
    }

    #[tokio::test]
    async fn released_reservation_frees_headroom() {
        let desk = desk();
        let a = desk.submit(order("EURUSD"), t0()).await.unwrap();
        desk.submit(order("GBPUSD"), t0()).await.unwrap();
        desk.release(a.order.signal.id, &ExecutionFailure::Unreachable("down".into())).await;
        assert!(desk.submit(order("AUDUSD"), t0()).await.is_ok());
    }

    #[tokio::test]
    async fn fill_then_take_profit_realizes_pnl() {
        let desk = desk();
        let approved = desk.submit(order("EURUSD"), t0()).await.unwrap();
        let position = desk.commit_fill(&approved, &fill(), t0()).await.unwrap();
        assert_eq!(position.phase, PositionPhase::Open);

        let obs = PriceObservation {
            timestamp: t0() + chrono::Duration::minutes(30),
            high:      1.10120,
            low:       1.10010,
        };
        let updates = desk.observe("EURUSD", obs).await;
        let [PositionUpdate::Closed { trade }] = updates.as_slice() else {
            panic!("expected one close, got {updates:?}");
        };
        assert!((trade.realized_pnl - 550.0).abs() < 1e-6);

        let snap = desk.snapshot(t0()).await;
        assert!(snap.account.open_positions.is_empty());
        assert!(snap.account.pending.is_empty());
        assert!((snap.account.equity - 100_550.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn refused_fill_releases_reservation() {
        let desk = desk();
        let approved = desk.submit(order("EURUSD"), t0()).await.unwrap();
        let bad = FillConfirmation { filled: true, actual_entry_price: 1.09800, ticket_id: None };
        assert!(desk.commit_fill(&approved, &bad, t0()).await.is_err());

        let snap = desk.snapshot(t0()).await;
        assert!(snap.account.pending.is_empty());
        assert!(snap.account.open_positions.is_empty());
    }

    #[tokio::test]
    async fn new_day_resets_daily_ledger() {
        let desk = desk();
        let mut events = desk.journal().subscribe();
        desk.apply_snapshot(99_000.0, 99_000.0, t0() + chrono::Duration::days(1)).await;
        assert!(matches!(events.recv().await, Ok(PipelineEvent::DailyReset { .. })));
        let snap = desk.snapshot(t0()).await;
        assert_eq!(snap.account.daily.realized_pnl, 0.0);
    }

    #[tokio::test]
    async fn joint_daily_loss_rejects_the_second_order() {
        let mut ledger = ledger_at(t0());
        ledger.account.realize(-4_400.0);
        let desk = desk_with(ledger);

        assert!(desk.submit(order("EURUSD"), t0()).await.is_ok());
        let second = desk.submit(order("GBPUSD"), t0()).await;
        assert!(
            matches!(second, Err(PipelineError::Compliance(ComplianceRejection::DailyLossLimit { .. }))),
            "got {second:?}"
        );
        assert_eq!(desk.snapshot(t0()).await.account.pending.len(), 1);
    }

    #[tokio::test]
    async fn joint_drawdown_rejects_the_second_order() {
        // losses booked yesterday leave today's daily budget untouched
        let mut ledger = ledger_at(t0() - Duration::days(1));
        ledger.account.realize(-9_200.0);
        let desk = desk_with(ledger);

        assert!(desk.submit(order("EURUSD"), t0()).await.is_ok());
        let snap = desk.snapshot(t0()).await;
        assert_eq!(snap.account.daily.realized_pnl, 0.0);

        let second = desk.submit(order("GBPUSD"), t0()).await;
        assert!(
            matches!(second, Err(PipelineError::Compliance(ComplianceRejection::MaxDrawdown { .. }))),
            "got {second:?}"
        );
    }

    #[tokio::test]
    async fn late_observation_keeps_the_daily_loss() {
        let tuesday = Utc.with_ymd_and_hms(2026, 3, 10, 0, 10, 0).unwrap();
        let mut ledger = ledger_at(tuesday);
        ledger.account.realize(-4_800.0);
        let desk = desk_with(ledger);
        let mut events = desk.journal().subscribe();

        let late = PriceObservation {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 9, 23, 55, 0).unwrap(),
            high:      1.27000,
            low:       1.26900,
        };
        desk.observe("GBPUSD", late).await;
        let current = PriceObservation {
            timestamp: tuesday + Duration::minutes(5),
            high:      1.10010,
            low:       1.09990,
        };
        desk.observe("EURUSD", current).await;

        let snap = desk.snapshot(tuesday).await;
        assert_eq!(snap.account.daily.day_id, PeriodClock::new(0).day_id(tuesday));
        assert_eq!(snap.account.daily.realized_pnl, -4_800.0);
        assert!(events.try_recv().is_err());

        let res = desk.submit(order("EURUSD"), tuesday + Duration::minutes(10)).await;
        assert!(
            matches!(res, Err(PipelineError::Compliance(ComplianceRejection::DailyLossLimit { .. }))),
            "got {res:?}"
        );
    }

    #[test]
    fn restore_applies_the_configured_window() {
        let clock = PeriodClock::new(0);
        let today = clock.day_id(t0());
        let mut consistency = ConsistencyLedger::new(30);
        consistency.record(clock.day_id(t0() - Duration::days(10)), 800.0);
        consistency.record(today, 200.0);

        let saved = PersistedState::new(
            t0(),
            AccountState::new(100_000.0, 100_000.0, today),
            WeeklyBook::new(clock.week_id(t0()), 100_000.0),
            consistency,
        );
        let ledger = Ledger::restore(saved, clock, 0.10, 5);

        assert_eq!(ledger.consistency.window_days, 5);
        assert_eq!(ledger.consistency.days.len(), 1);
        assert_eq!(ledger.consistency.day_profit(today), 200.0);
    }
}
