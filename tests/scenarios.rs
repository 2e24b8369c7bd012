//! End-to-end runs of one instrument pipeline against the in-process bridge.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::broadcast;

use xpws_engine::{
    config::PipelineConfig,
    engine::{
        InstrumentPipeline, MarketEvent, MockBridge, PipelineOutcome, PositionUpdate, WeeklyBook,
        WeeklyProfitRecord,
    },
    events::{Journal, PipelineEvent},
    models::{
        AccountState, CloseReason, InstrumentRegistry, Position, PositionMode, PositionPhase,
        PriceBar, Timeframe,
    },
    risk::{ComplianceGate, ConsistencyLedger},
    state::{Desk, Ledger},
    store::PersistedState,
};

const EURUSD: &str = "EURUSD";

// ─── Fixtures ─────────────────────────────────────────────────────────────────

/// Monday.
fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap()
}

fn htf(day: i64, hour: i64, o: f64, h: f64, l: f64, c: f64) -> MarketEvent {
    MarketEvent::Bar {
        timeframe: Timeframe::H1,
        bar:       PriceBar::new(base() + Duration::days(day) + Duration::hours(hour), o, h, l, c),
    }
}

/// M5 bar `minutes` after the 06:00 close of the breaking H1 bar.
fn ltf(day: i64, minutes: i64, o: f64, h: f64, l: f64, c: f64) -> MarketEvent {
    MarketEvent::Bar {
        timeframe: Timeframe::M5,
        bar:       PriceBar::new(
            base() + Duration::days(day) + Duration::hours(6) + Duration::minutes(minutes),
            o,
            h,
            l,
            c,
        ),
    }
}

fn registry() -> Arc<InstrumentRegistry> {
    Arc::new(
        InstrumentRegistry::new(
            InstrumentRegistry::default_specs(),
            InstrumentRegistry::default_class_units(),
        )
        .unwrap(),
    )
}

/// Config where one 1:1 win is worth 4% of equity.
fn aggressive() -> PipelineConfig {
    PipelineConfig {
        risk_per_trade_fraction: 0.04,
        risk_ceiling_fraction:   0.04,
        max_open_risk_fraction:  0.05,
        ..PipelineConfig::default()
    }
}

struct Harness {
    config:   PipelineConfig,
    registry: Arc<InstrumentRegistry>,
    desk:     Arc<Desk>,
    events:   broadcast::Receiver<PipelineEvent>,
}

impl Harness {
    fn new(config: PipelineConfig, ledger: Ledger) -> Self {
        let registry = registry();
        let journal = Journal::new(1024);
        let events = journal.subscribe();
        let desk = Arc::new(Desk::new(
            ledger,
            ComplianceGate::new(config.gate_limits()),
            config.clock(),
            Arc::clone(&registry),
            journal,
        ));
        Self { config, registry, desk, events }
    }

    fn fresh(config: PipelineConfig) -> Self {
        let ledger = Ledger::fresh(
            100_000.0,
            base(),
            config.clock(),
            config.weekly_profit_activation_threshold,
            config.consistency_window_days,
        );
        Self::new(config, ledger)
    }

    fn pipeline(&self, gateway: Arc<MockBridge>) -> InstrumentPipeline<MockBridge> {
        InstrumentPipeline::new(
            EURUSD,
            &self.config,
            Arc::clone(&self.registry),
            Arc::clone(&self.desk),
            gateway,
        )
        .unwrap()
    }

    fn drain(&mut self) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Bullish H1 break of the 1.1010 swing high on `day`, then an M5 break candle
/// and a retest at 1.1011. Returns the retest bar's outcomes.
async fn run_setup(p: &mut InstrumentPipeline<MockBridge>, day: i64) -> Vec<PipelineOutcome> {
    // 10 pips of volatility: stop at 1.1002, 1:1 at 1.1022, 1:2 at 1.1032
    p.handle(MarketEvent::Volatility(0.0010)).await.unwrap();

    for bar in [
        htf(day, 0, 1.0990, 1.0995, 1.0980, 1.0992),
        htf(day, 1, 1.0992, 1.1000, 1.0985, 1.0998),
        htf(day, 2, 1.0998, 1.1010, 1.0990, 1.1002),
        htf(day, 3, 1.1002, 1.1004, 1.0988, 1.0995),
        htf(day, 4, 1.0995, 1.1000, 1.0986, 1.0998),
        htf(day, 5, 1.0998, 1.1030, 1.0996, 1.1025),
    ] {
        assert!(p.handle(bar).await.unwrap().is_empty());
    }

    p.handle(ltf(day, 0, 1.1025, 1.1035, 1.1020, 1.1030)).await.unwrap();
    p.handle(ltf(day, 5, 1.1030, 1.1032, 1.1018, 1.1020)).await.unwrap();
    p.handle(ltf(day, 10, 1.1020, 1.1022, 1.1011, 1.1019)).await.unwrap()
}

fn opened(outcomes: &[PipelineOutcome]) -> Position {
    match outcomes {
        [PipelineOutcome::Opened { position }] => (**position).clone(),
        other => panic!("expected one opened position, got {other:?}"),
    }
}

fn close_of(outcomes: &[PipelineOutcome]) -> (CloseReason, f64) {
    match outcomes {
        [PipelineOutcome::Updated { update: PositionUpdate::Closed { trade } }] => {
            (trade.reason, trade.realized_pnl)
        }
        other => panic!("expected one close, got {other:?}"),
    }
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn standard_trade_opens_and_closes_at_one_to_one() {
    let mut h = Harness::fresh(PipelineConfig::default());
    let gateway = Arc::new(MockBridge::new());
    let mut p = h.pipeline(Arc::clone(&gateway));

    let position = opened(&run_setup(&mut p, 0).await);
    assert_eq!(position.mode, PositionMode::Standard);
    assert!((position.entry_price - 1.1012).abs() < 1e-9);
    assert!((position.stop_loss_price - 1.1002).abs() < 1e-9);
    assert!((position.take_profit_price - 1.1022).abs() < 1e-9);
    // 0.55% of 100 000 over 100 per lot
    assert!((position.size - 5.5).abs() < 0.011);
    assert_eq!(gateway.submitted(), 1);

    let (reason, pnl) = close_of(&p.handle(ltf(0, 15, 1.1019, 1.1025, 1.1015, 1.1024)).await.unwrap());
    assert_eq!(reason, CloseReason::TakeProfit);
    assert!((pnl - position.size * 100.0).abs() < 1e-3);

    let snap = h.desk.snapshot(base() + Duration::hours(7)).await;
    assert!(snap.account.open_positions.is_empty());
    assert!(snap.account.pending.is_empty());
    assert!((snap.account.equity - (100_000.0 + pnl)).abs() < 1e-6);
    assert!(snap.weekly.records[EURUSD].realized_profit_fraction > 0.005);
    assert!(!snap.weekly.records[EURUSD].enhanced_mode_active);

    let events = h.drain();
    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StructureBreak { .. }  => Some("break"),
            PipelineEvent::SignalEmitted { .. }   => Some("signal"),
            PipelineEvent::OrderApproved { .. }   => Some("approved"),
            PipelineEvent::PositionOpened { .. }  => Some("opened"),
            PipelineEvent::PositionClosed { .. }  => Some("closed"),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, ["break", "signal", "approved", "opened", "closed"]);
}

#[tokio::test]
async fn weekly_profit_crossing_threshold_switches_next_trade_to_enhanced() {
    let config = aggressive();
    let clock = config.clock();

    // 7% already banked on EURUSD this week
    let week_id = clock.week_id(base());
    let mut weekly = WeeklyBook::new(week_id, 100_000.0);
    weekly.records.insert(
        EURUSD.to_string(),
        WeeklyProfitRecord {
            week_id,
            realized_profit_fraction: 0.07,
            enhanced_mode_active:     false,
            activation_timestamp:     None,
        },
    );
    let saved = PersistedState::new(
        base(),
        AccountState::new(100_000.0, 100_000.0, clock.day_id(base())),
        weekly,
        ConsistencyLedger::new(config.consistency_window_days),
    );
    let ledger = Ledger::restore(
        saved,
        clock,
        config.weekly_profit_activation_threshold,
        config.consistency_window_days,
    );
    let mut h = Harness::new(config, ledger);
    let gateway = Arc::new(MockBridge::new());

    // ── Monday: standard trade, +4% ──────────────────────────────────────────
    let mut monday = h.pipeline(Arc::clone(&gateway));
    let first = opened(&run_setup(&mut monday, 0).await);
    assert_eq!(first.mode, PositionMode::Standard);

    let (reason, _) = close_of(&monday.handle(ltf(0, 15, 1.1019, 1.1025, 1.1015, 1.1024)).await.unwrap());
    assert_eq!(reason, CloseReason::TakeProfit);

    let tuesday_open = base() + Duration::days(1);
    assert_eq!(h.desk.current_mode(EURUSD, tuesday_open).await, PositionMode::Enhanced);
    let record = h.desk.snapshot(tuesday_open).await.weekly.records[EURUSD].clone();
    assert!((record.realized_profit_fraction - 0.11).abs() < 1e-3);
    assert!(record.enhanced_mode_active);
    assert!(h.drain().iter().any(|e| matches!(e, PipelineEvent::EnhancedModeActivated { .. })));

    // ── Tuesday: enhanced trade migrates at 1:1 and exits at 1:2 ────────────
    let mut tuesday = h.pipeline(Arc::clone(&gateway));
    let second = opened(&run_setup(&mut tuesday, 1).await);
    assert_eq!(second.mode, PositionMode::Enhanced);
    assert!((second.take_profit_price - 1.1022).abs() < 1e-9);

    let migrated = tuesday.handle(ltf(1, 15, 1.1019, 1.1025, 1.1015, 1.1024)).await.unwrap();
    match migrated.as_slice() {
        [PipelineOutcome::Updated {
            update: PositionUpdate::Migrated { stop_loss_price, take_profit_price, .. },
        }] => {
            assert!((stop_loss_price - second.entry_price).abs() < 1e-9);
            assert!((take_profit_price - 1.1032).abs() < 1e-9);
        }
        other => panic!("expected a break-even migration, got {other:?}"),
    }

    let snap = h.desk.snapshot(tuesday_open).await;
    let live = snap.account.open_positions.values().next().unwrap();
    assert_eq!(live.phase, PositionPhase::BreakevenMigrated);
    assert_eq!(snap.open_risk, 0.0);

    let (reason, pnl) = close_of(&tuesday.handle(ltf(1, 20, 1.1024, 1.1035, 1.1020, 1.1033)).await.unwrap());
    assert_eq!(reason, CloseReason::TakeProfit);
    assert!((pnl - 2.0 * second.size * 100.0).abs() < 1e-3);
    assert_eq!(gateway.submitted(), 2);
}

#[tokio::test]
async fn migrated_enhanced_position_scratches_at_entry() {
    let config = aggressive();
    let clock = config.clock();
    let mut weekly = WeeklyBook::new(clock.week_id(base()), 100_000.0);
    weekly.records.insert(
        EURUSD.to_string(),
        WeeklyProfitRecord {
            week_id:                  weekly.week_id,
            realized_profit_fraction: 0.12,
            enhanced_mode_active:     true,
            activation_timestamp:     Some(base()),
        },
    );
    let saved = PersistedState::new(
        base(),
        AccountState::new(100_000.0, 100_000.0, clock.day_id(base())),
        weekly,
        ConsistencyLedger::new(30),
    );
    let h = Harness::new(config, Ledger::restore(saved, clock, 0.10, 30));
    let mut p = h.pipeline(Arc::new(MockBridge::new()));

    let position = opened(&run_setup(&mut p, 0).await);
    assert_eq!(position.mode, PositionMode::Enhanced);

    p.handle(ltf(0, 15, 1.1019, 1.1025, 1.1015, 1.1024)).await.unwrap();
    let (reason, pnl) = close_of(&p.handle(ltf(0, 20, 1.1024, 1.1026, 1.1008, 1.1010)).await.unwrap());
    assert_eq!(reason, CloseReason::Breakeven);
    assert!(pnl.abs() < 1e-6);
}

#[tokio::test]
async fn daily_loss_headroom_rejects_before_execution() {
    let config = PipelineConfig::default();
    let mut ledger = Ledger::fresh(100_000.0, base(), config.clock(), 0.10, 30);
    ledger.account.realize(-4_800.0);
    let mut h = Harness::new(config, ledger);
    let gateway = Arc::new(MockBridge::new());
    let mut p = h.pipeline(Arc::clone(&gateway));

    match run_setup(&mut p, 0).await.as_slice() {
        [PipelineOutcome::Dropped { category, .. }] => assert_eq!(*category, "COMPLIANCE"),
        other => panic!("expected a compliance drop, got {other:?}"),
    }
    assert_eq!(gateway.submitted(), 0);

    let snap = h.desk.snapshot(base() + Duration::hours(7)).await;
    assert!(snap.account.pending.is_empty());
    assert!(snap.account.open_positions.is_empty());
    assert!(h.drain().iter().any(|e| matches!(e, PipelineEvent::ComplianceRejected { .. })));
}

#[tokio::test]
async fn broker_rejection_releases_reservation() {
    let mut h = Harness::fresh(PipelineConfig::default());
    let gateway = Arc::new(MockBridge::rejecting("market closed"));
    let mut p = h.pipeline(Arc::clone(&gateway));

    match run_setup(&mut p, 0).await.as_slice() {
        [PipelineOutcome::Dropped { category, .. }] => assert_eq!(*category, "EXECUTION"),
        other => panic!("expected an execution drop, got {other:?}"),
    }
    assert_eq!(gateway.submitted(), 1);

    let snap = h.desk.snapshot(base() + Duration::hours(7)).await;
    assert!(snap.account.pending.is_empty());
    assert!(snap.account.open_positions.is_empty());
    assert_eq!(snap.open_risk, 0.0);
    assert!(h.drain().iter().any(|e| matches!(e, PipelineEvent::ExecutionFailed { .. })));
}

#[tokio::test]
async fn out_of_order_bar_is_rejected_without_side_effects() {
    let mut h = Harness::fresh(PipelineConfig::default());
    let mut p = h.pipeline(Arc::new(MockBridge::new()));

    p.handle(htf(0, 1, 1.0992, 1.1000, 1.0985, 1.0998)).await.unwrap();
    assert!(p.handle(htf(0, 0, 1.0990, 1.0995, 1.0980, 1.0992)).await.is_err());
    let h4 = MarketEvent::Bar {
        timeframe: Timeframe::H4,
        bar:       PriceBar::new(base() + Duration::hours(4), 1.1, 1.1, 1.1, 1.1),
    };
    assert!(p.handle(h4).await.is_err());

    let rejected = h
        .drain()
        .into_iter()
        .filter(|e| matches!(e, PipelineEvent::BarRejected { .. }))
        .count();
    assert_eq!(rejected, 2);
}
