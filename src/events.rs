//! # events
//!
//! Defines [`PipelineEvent`], one variant per thing the pipeline reports,
//! and the [`Journal`] that broadcasts them.
//!
//! Events are cloned into a `tokio::sync::broadcast` channel; the binary runs
//! one subscriber that logs each event as JSON, and tests subscribe to assert
//! on the sequence.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::structure::InvalidationReason;
use crate::models::{
    CandidateSignal, ClosedTrade, DayId, Direction, Position, PositionMode, Timeframe, WeekId,
};
use crate::risk::{Advisory, ComplianceRule};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineEvent {
    /// Malformed or out-of-order bar dropped at the detector.
    BarRejected {
        instrument: String,
        timeframe:  Timeframe,
        reason:     String,
    },

    StructureBreak {
        instrument: String,
        direction:  Direction,
        level:      f64,
        at:         DateTime<Utc>,
    },

    SetupInvalidated {
        instrument: String,
        direction:  Direction,
        level:      f64,
        reason:     InvalidationReason,
    },

    /// Retest validated and priced.
    SignalEmitted {
        signal: Box<CandidateSignal>,
    },

    /// Candidate dropped by a stage before or after the gate.
    CandidateDropped {
        instrument: String,
        category:   &'static str,
        reason:     String,
    },

    OrderApproved {
        order_id:      Uuid,
        instrument:    String,
        size:          f64,
        risk_fraction: f64,
        mode:          PositionMode,
        modified_by:   Option<ComplianceRule>,
        advisories:    Vec<Advisory>,
    },

    ComplianceRejected {
        order_id:   Uuid,
        instrument: String,
        reason:     String,
    },

    PositionOpened {
        position: Box<Position>,
    },

    /// Execution collaborator refused or never answered; reservation released.
    ExecutionFailed {
        order_id:   Uuid,
        instrument: String,
        reason:     String,
    },

    BreakevenMigrated {
        position_id:       Uuid,
        instrument:        String,
        stop_loss_price:   f64,
        take_profit_price: f64,
    },

    PositionClosed {
        trade: Box<ClosedTrade>,
    },

    EnhancedModeActivated {
        instrument: String,
        week_id:    WeekId,
        fraction:   f64,
        at:         DateTime<Utc>,
    },

    WeeklyReset {
        previous: WeekId,
        current:  WeekId,
    },

    DailyReset {
        previous: DayId,
        current:  DayId,
    },

    AccountSnapshot {
        equity:   f64,
        balance:  f64,
        drawdown: f64,
    },
}

impl PipelineEvent {
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

// ─── Journal ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Journal {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Never fails: with no subscriber the event is simply not delivered.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Log every journal event until the channel closes.
pub async fn log_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => info!(target: "xpws_engine::journal", "{}", event.to_json()),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Journal logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
