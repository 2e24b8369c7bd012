//! # engine::pipeline
//!
//! **Instrument pipeline**: one task per instrument, fed by an `mpsc`
//! channel, wiring the stages together:
//!
//! ```text
//!  HTF bar ─▶ detector ─▶ (break / invalidation events)
//!  LTF bar ─▶ detector ─▶ ATR ─▶ desk.observe (open positions)
//!                 │
//!                 └─ RetestSignal ─▶ trigger ─▶ sizer ─▶ desk.submit (gate + reserve)
//!                                                          │
//!                                       gateway.submit ◀───┘
//!                                             │
//!                              desk.commit_fill / desk.release
//! ```
//!
//! A data-ordering error comes back as `Err`; every later stage rejection is
//! an [`PipelineOutcome::Dropped`] outcome, published on the journal and
//! otherwise leaving no state behind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::engine::atr::AverageTrueRange;
use crate::engine::executor::ExecutionGateway;
use crate::engine::lifecycle::{PositionUpdate, PriceObservation};
use crate::engine::sizer::VolatilityPositionSizer;
use crate::engine::structure::{StructureEvent, StructureSignalDetector};
use crate::engine::trigger::EntryTriggerCalculator;
use crate::error::{AppError, ConfigError, DataError, PipelineError, ValidationRejection};
use crate::events::PipelineEvent;
use crate::models::{
    InstrumentRegistry, InstrumentSpec, Position, PriceBar, RetestSignal, Timeframe,
};
use crate::state::Desk;

// ─── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketEvent {
    Bar { timeframe: Timeframe, bar: PriceBar },
    /// Volatility measure in native price units.
    Volatility(f64),
}

pub type PipelineReply = oneshot::Sender<Result<Vec<PipelineOutcome>, PipelineError>>;

#[derive(Debug)]
pub struct FeedMessage {
    pub event: MarketEvent,
    /// Set when the sender waits for the outcomes.
    pub reply: Option<PipelineReply>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineOutcome {
    Opened { position: Box<Position> },
    Updated { update: PositionUpdate },
    Dropped { category: &'static str, reason: String },
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

pub struct InstrumentPipeline<E> {
    instrument:          String,
    spec:                InstrumentSpec,
    unit:                f64,
    higher:              Timeframe,
    lower:               Timeframe,
    detector:            StructureSignalDetector,
    trigger:             EntryTriggerCalculator,
    sizer:               VolatilityPositionSizer,
    atr:                 AverageTrueRange,
    external_volatility: Option<f64>,
    desk:                Arc<Desk>,
    gateway:             Arc<E>,
}

impl<E: ExecutionGateway> InstrumentPipeline<E> {
    pub fn new(
        instrument: &str,
        config:     &PipelineConfig,
        registry:   Arc<InstrumentRegistry>,
        desk:       Arc<Desk>,
        gateway:    Arc<E>,
    ) -> Result<Self, ConfigError> {
        let spec = registry.spec(instrument)?.clone();
        let unit = registry.unit_of(instrument)?;

        Ok(Self {
            instrument:          instrument.to_string(),
            spec,
            unit,
            higher:              config.higher_timeframe,
            lower:               config.lower_timeframe,
            detector:            StructureSignalDetector::new(
                instrument,
                config.higher_timeframe,
                config.lower_timeframe,
                config.structure,
                unit,
            ),
            trigger:             config.trigger(registry),
            sizer:               config.sizer(),
            atr:                 AverageTrueRange::new(config.atr_period),
            external_volatility: None,
            desk,
            gateway,
        })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub async fn handle(&mut self, event: MarketEvent) -> Result<Vec<PipelineOutcome>, PipelineError> {
        match event {
            MarketEvent::Volatility(value) => {
                if value.is_finite() && value > 0.0 {
                    self.external_volatility = Some(value);
                    debug!(instrument = %self.instrument, value, "Volatility updated");
                } else {
                    warn!(instrument = %self.instrument, value, "Ignoring non-positive volatility");
                }
                Ok(Vec::new())
            }
            MarketEvent::Bar { timeframe, bar } if timeframe == self.higher => {
                let events = self.detector.on_higher_bar(&bar).map_err(|e| self.reject_bar(timeframe, e))?;
                self.publish_structure(events);
                Ok(Vec::new())
            }
            MarketEvent::Bar { timeframe, bar } if timeframe == self.lower => {
                self.on_lower_bar(bar).await
            }
            MarketEvent::Bar { timeframe, bar } => Err(self.reject_bar(
                timeframe,
                DataError::Malformed {
                    instrument: self.instrument.clone(),
                    timeframe,
                    at:         bar.timestamp,
                    reason:     "timeframe not configured for this pipeline",
                },
            )),
        }
    }

    async fn on_lower_bar(&mut self, bar: PriceBar) -> Result<Vec<PipelineOutcome>, PipelineError> {
        let events = self.detector.on_lower_bar(&bar).map_err(|e| self.reject_bar(self.lower, e))?;
        self.atr.update(&bar);

        let closes_at = bar.timestamp + self.lower.duration();
        let mut outcomes: Vec<PipelineOutcome> = self
            .desk
            .observe(&self.instrument, PriceObservation::from_bar(&bar, closes_at))
            .await
            .into_iter()
            .map(|update| PipelineOutcome::Updated { update })
            .collect();

        for signal in self.publish_structure(events) {
            outcomes.push(self.process_signal(signal, closes_at).await);
        }
        Ok(outcomes)
    }

    /// Journal the detector's events; returns the retest signals among them.
    fn publish_structure(&self, events: Vec<StructureEvent>) -> Vec<RetestSignal> {
        let journal = self.desk.journal();
        let mut signals = Vec::new();
        for event in events {
            match event {
                StructureEvent::Break { direction, level, at } => {
                    journal.publish(PipelineEvent::StructureBreak {
                        instrument: self.instrument.clone(),
                        direction,
                        level,
                        at,
                    });
                }
                StructureEvent::Invalidated { direction, level, reason } => {
                    journal.publish(PipelineEvent::SetupInvalidated {
                        instrument: self.instrument.clone(),
                        direction,
                        level,
                        reason,
                    });
                }
                StructureEvent::Signal(signal) => signals.push(signal),
                StructureEvent::BreakCandle { .. } | StructureEvent::Touch { .. } => {}
            }
        }
        signals
    }

    async fn process_signal(&self, retest: RetestSignal, now: DateTime<Utc>) -> PipelineOutcome {
        // ── 1. Trigger ────────────────────────────────────────────────────────
        let candidate = match self.trigger.price(retest) {
            Ok(candidate) => candidate,
            Err(e) => return self.drop_candidate(e.into()),
        };
        self.desk.journal().publish(PipelineEvent::SignalEmitted { signal: Box::new(candidate.clone()) });

        // ── 2. Size ───────────────────────────────────────────────────────────
        let Some(volatility) = self.external_volatility.or_else(|| self.atr.value()) else {
            return self.drop_candidate(
                ValidationRejection::VolatilityUnavailable { instrument: self.instrument.clone() }.into(),
            );
        };
        let equity = self.desk.equity().await;
        let sized = match self.sizer.size(candidate, volatility, equity, &self.spec, self.unit) {
            Ok(sized) => sized,
            Err(e) => return self.drop_candidate(e.into()),
        };

        // ── 3. Gate + reservation ─────────────────────────────────────────────
        let approved = match self.desk.submit(sized, now).await {
            Ok(approved) => approved,
            Err(e) => return self.drop_candidate(e),
        };

        // ── 4. Execute (outside the desk lock) ────────────────────────────────
        let request = approved.order.to_request();
        match self.gateway.submit(&request).await {
            Ok(fill) => match self.desk.commit_fill(&approved, &fill, now).await {
                Ok(position) => PipelineOutcome::Opened { position: Box::new(position) },
                Err(e) => self.dropped(e),
            },
            Err(failure) => {
                self.desk.release(request.order_id, &failure).await;
                self.dropped(failure.into())
            }
        }
    }

    fn reject_bar(&self, timeframe: Timeframe, err: DataError) -> PipelineError {
        warn!(instrument = %self.instrument, %timeframe, error = %err, "Bar rejected");
        self.desk.journal().publish(PipelineEvent::BarRejected {
            instrument: self.instrument.clone(),
            timeframe,
            reason:     err.to_string(),
        });
        err.into()
    }

    /// Journal a stage rejection; the desk journals its own compliance rejections.
    fn drop_candidate(&self, err: PipelineError) -> PipelineOutcome {
        if !matches!(err, PipelineError::Compliance(_)) {
            self.desk.journal().publish(PipelineEvent::CandidateDropped {
                instrument: self.instrument.clone(),
                category:   err.category(),
                reason:     err.to_string(),
            });
        }
        self.dropped(err)
    }

    fn dropped(&self, err: PipelineError) -> PipelineOutcome {
        info!(instrument = %self.instrument, category = err.category(), reason = %err, "Candidate dropped");
        PipelineOutcome::Dropped { category: err.category(), reason: err.to_string() }
    }

    /// Drain the feed until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<FeedMessage>) {
        info!(instrument = %self.instrument, higher = %self.higher, lower = %self.lower, "Pipeline started");
        while let Some(FeedMessage { event, reply }) = rx.recv().await {
            let result = self.handle(event).await;
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        info!(instrument = %self.instrument, "Pipeline stopped");
    }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Inbound side of every pipeline's channel.
#[derive(Debug, Clone, Default)]
pub struct FeedRouter {
    senders: HashMap<String, mpsc::Sender<FeedMessage>>,
}

impl FeedRouter {
    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.senders.keys().map(String::as_str)
    }

    fn sender(&self, instrument: &str) -> Result<&mpsc::Sender<FeedMessage>, AppError> {
        self.senders
            .get(instrument)
            .ok_or_else(|| AppError::NotFound(format!("no pipeline for instrument '{instrument}'")))
    }

    /// Queue an event without waiting for its outcome.
    pub async fn dispatch(&self, instrument: &str, event: MarketEvent) -> Result<(), AppError> {
        self.sender(instrument)?
            .send(FeedMessage { event, reply: None })
            .await
            .map_err(|_| AppError::Unavailable(format!("pipeline for '{instrument}' has stopped")))
    }

    /// Queue an event and wait for the pipeline's outcomes.
    pub async fn request(
        &self,
        instrument: &str,
        event:      MarketEvent,
    ) -> Result<Vec<PipelineOutcome>, AppError> {
        let (tx, rx) = oneshot::channel();
        self.sender(instrument)?
            .send(FeedMessage { event, reply: Some(tx) })
            .await
            .map_err(|_| AppError::Unavailable(format!("pipeline for '{instrument}' has stopped")))?;
        let result = rx
            .await
            .map_err(|_| AppError::Unavailable(format!("pipeline for '{instrument}' dropped the request")))?;
        Ok(result?)
    }
}

/// Spawn one pipeline task per registered instrument.
pub fn spawn_pipelines<E>(
    config:   &PipelineConfig,
    registry: Arc<InstrumentRegistry>,
    desk:     Arc<Desk>,
    gateway:  Arc<E>,
    capacity: usize,
) -> Result<(FeedRouter, Vec<(String, JoinHandle<()>)>), ConfigError>
where
    E: ExecutionGateway + 'static,
{
    let mut router = FeedRouter::default();
    let mut handles = Vec::new();

    let mut symbols: Vec<String> = registry.symbols().map(str::to_string).collect();
    symbols.sort();

    for symbol in symbols {
        let pipeline = InstrumentPipeline::new(
            &symbol,
            config,
            Arc::clone(&registry),
            Arc::clone(&desk),
            Arc::clone(&gateway),
        )?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        router.senders.insert(symbol.clone(), tx);
        handles.push((symbol, tokio::spawn(pipeline.run(rx))));
    }

    Ok((router, handles))
}

/// Watch every pipeline task until it ends. A panic or cancellation is logged
/// as soon as it happens; the affected symbols are returned once all tasks
/// are done.
pub async fn supervise(pipelines: Vec<(String, JoinHandle<()>)>) -> Vec<String> {
    let watchers: Vec<JoinHandle<Option<String>>> = pipelines
        .into_iter()
        .map(|(symbol, handle)| {
            tokio::spawn(async move {
                match handle.await {
                    Ok(()) => None,
                    Err(e) if e.is_panic() => {
                        error!(instrument = %symbol, error = %e, "💥 Pipeline task panicked");
                        Some(symbol)
                    }
                    Err(e) => {
                        warn!(instrument = %symbol, error = %e, "Pipeline task cancelled");
                        Some(symbol)
                    }
                }
            })
        })
        .collect();

    let mut failed = Vec::new();
    for watcher in watchers {
        if let Ok(Some(symbol)) = watcher.await {
            failed.push(symbol);
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn supervise_reports_only_failed_pipelines() {
        let clean = tokio::spawn(async {});
        let crashed: JoinHandle<()> = tokio::spawn(async { panic!("bar handler blew up") });
        let pending = tokio::spawn(std::future::pending::<()>());
        pending.abort();

        let failed = supervise(vec![
            ("EURUSD".to_string(), clean),
            ("GBPUSD".to_string(), crashed),
            ("XAUUSD".to_string(), pending),
        ])
        .await;

        assert_eq!(failed, vec!["GBPUSD".to_string(), "XAUUSD".to_string()]);
    }
}
