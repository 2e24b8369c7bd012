//! # engine::structure
//!
//! **Structure Signal Detector**: break of structure on the higher timeframe,
//! retest confirmation on the lower timeframe.
//!
//! ```text
//!            HTF close beyond swing                 LTF bar beyond level
//!   IDLE ───────────────────────────▶ AWAITING_RETEST ───────────────────▶ (break candle recorded)
//!    ▲                                   │   │                                    │
//!    │  opposing HTF break / too many    │   │     LTF touch within tolerance,    │
//!    │  touches / expiry                 │   │     closes on break side,          │
//!    └───────────────────────────────────┘   │     momentum not adverse           │
//!    ▲                                       ▼                                    │
//!    └──────────────────────────────── SIGNAL_READY ◀─────────────────────────────┘
//!                                     (one RetestSignal)
//! ```
//!
//! Bars must arrive in strictly increasing timestamp order per timeframe; a
//! bar that does not is rejected with [`DataError::OutOfOrder`] and leaves the
//! detector untouched. Feeding the same bar twice therefore never produces a
//! second signal.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DataError;
use crate::models::{Direction, PriceBar, RetestSignal, Timeframe};

// ─── Params ───────────────────────────────────────────────────────────────────

/// Detector parameters. Distances are in normalized units and converted to
/// price with the instrument's unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureParams {
    /// Bars on each side a swing extreme must dominate.
    pub swing_strength:         usize,
    /// How close to the break level a lower-timeframe bar must come.
    pub retest_tolerance_units: f64,
    /// Touches allowed before the setup is abandoned.
    pub max_retest_touches:     u32,
    /// Largest adverse body/range ratio accepted on the retest bar.
    pub max_adverse_momentum:   f64,
    /// Lower-timeframe bars after the break before the setup expires (0 = never).
    pub retest_expiry_bars:     u32,
}

impl Default for StructureParams {
    fn default() -> Self {
        Self {
            swing_strength:         2,
            retest_tolerance_units: 3.0,
            max_retest_touches:     3,
            max_adverse_momentum:   0.5,
            retest_expiry_bars:     48,
        }
    }
}

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct Swing {
    level: f64,
    at:    DateTime<Utc>,
}

/// Live break awaiting its retest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureState {
    pub last_break_level: f64,
    pub break_direction:  Direction,
    /// Close time of the higher-timeframe bar that broke structure.
    pub break_timestamp:  DateTime<Utc>,
    pub awaiting_retest:  bool,
    /// Open time of the first lower-timeframe bar trading beyond the level.
    pub break_candle_at:  Option<DateTime<Utc>>,
    pub touches:          u32,
    pub bars_since_break: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidationReason {
    OpposingBreak,
    TooManyTouches,
    Expired,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvalidationReason::OpposingBreak  => "opposing structure break before retest",
            InvalidationReason::TooManyTouches => "too many retest touches",
            InvalidationReason::Expired        => "no retest within expiry window",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructureEvent {
    Break { direction: Direction, level: f64, at: DateTime<Utc> },
    BreakCandle { at: DateTime<Utc> },
    Touch { touches: u32, at: DateTime<Utc> },
    Invalidated { direction: Direction, level: f64, reason: InvalidationReason },
    Signal(RetestSignal),
}

// ─── Detector ─────────────────────────────────────────────────────────────────

pub struct StructureSignalDetector {
    instrument:   String,
    higher:       Timeframe,
    lower:        Timeframe,
    params:       StructureParams,
    tolerance:    f64,
    htf_window:   VecDeque<PriceBar>,
    swing_high:   Option<Swing>,
    swing_low:    Option<Swing>,
    state:        Option<StructureState>,
    last_higher:  Option<DateTime<Utc>>,
    last_lower:   Option<DateTime<Utc>>,
    last_emitted: Option<(Direction, f64)>,
}

impl StructureSignalDetector {
    pub fn new(
        instrument: &str,
        higher:     Timeframe,
        lower:      Timeframe,
        params:     StructureParams,
        unit:       f64,
    ) -> Self {
        let swing_strength = params.swing_strength.max(1);
        Self {
            instrument:   instrument.to_string(),
            higher,
            lower,
            params:       StructureParams { swing_strength, ..params },
            tolerance:    params.retest_tolerance_units * unit,
            htf_window:   VecDeque::with_capacity(2 * swing_strength + 2),
            swing_high:   None,
            swing_low:    None,
            state:        None,
            last_higher:  None,
            last_lower:   None,
            last_emitted: None,
        }
    }

    pub fn state(&self) -> Option<&StructureState> {
        self.state.as_ref()
    }

    pub fn is_awaiting_retest(&self) -> bool {
        self.state.is_some()
    }

    // ─── Higher timeframe ─────────────────────────────────────────────────────

    pub fn on_higher_bar(&mut self, bar: &PriceBar) -> Result<Vec<StructureEvent>, DataError> {
        self.admit(self.higher, bar)?;
        let mut events = Vec::new();

        self.track_swings(*bar);

        let Some((direction, level)) = self.detect_break(bar) else {
            return Ok(events);
        };
        let at = bar.timestamp + self.higher.duration();

        match self.state.take() {
            Some(setup) if direction == setup.break_direction.opposite() => {
                info!(
                    instrument = %self.instrument,
                    level      = setup.last_break_level,
                    direction  = ?setup.break_direction,
                    "❌ Setup invalidated by opposing break"
                );
                events.push(StructureEvent::Invalidated {
                    direction: setup.break_direction,
                    level:     setup.last_break_level,
                    reason:    InvalidationReason::OpposingBreak,
                });
            }
            Some(setup) => {
                debug!(
                    instrument = %self.instrument,
                    level,
                    "Continuation break while awaiting retest — keeping original setup"
                );
                self.state = Some(setup);
            }
            None if self.last_emitted == Some((direction, level)) => {
                debug!(instrument = %self.instrument, level, "Level already signalled — not re-arming");
            }
            None => {
                info!(
                    instrument = %self.instrument,
                    direction  = ?direction,
                    level,
                    %at,
                    "📐 Structure break — awaiting retest"
                );
                self.state = Some(StructureState {
                    last_break_level: level,
                    break_direction:  direction,
                    break_timestamp:  at,
                    awaiting_retest:  true,
                    break_candle_at:  None,
                    touches:          0,
                    bars_since_break: 0,
                });
                events.push(StructureEvent::Break { direction, level, at });
            }
        }

        Ok(events)
    }

    fn track_swings(&mut self, bar: PriceBar) {
        let n = self.params.swing_strength;
        self.htf_window.push_back(bar);
        if self.htf_window.len() > 2 * n + 1 {
            self.htf_window.pop_front();
        }
        if self.htf_window.len() < 2 * n + 1 {
            return;
        }

        let pivot = self.htf_window[n];
        let is_high = self.htf_window.iter().enumerate().all(|(i, b)| i == n || b.high < pivot.high);
        let is_low  = self.htf_window.iter().enumerate().all(|(i, b)| i == n || b.low > pivot.low);

        if is_high {
            self.swing_high = Some(Swing { level: pivot.high, at: pivot.timestamp });
            debug!(instrument = %self.instrument, level = pivot.high, "Swing high confirmed");
        }
        if is_low {
            self.swing_low = Some(Swing { level: pivot.low, at: pivot.timestamp });
            debug!(instrument = %self.instrument, level = pivot.low, "Swing low confirmed");
        }
    }

    /// A close beyond the latest swing consumes that swing.
    fn detect_break(&mut self, bar: &PriceBar) -> Option<(Direction, f64)> {
        if let Some(high) = self.swing_high {
            if bar.close > high.level {
                debug!(swing_at = %high.at, "Swing high broken");
                self.swing_high = None;
                return Some((Direction::Long, high.level));
            }
        }
        if let Some(low) = self.swing_low {
            if bar.close < low.level {
                debug!(swing_at = %low.at, "Swing low broken");
                self.swing_low = None;
                return Some((Direction::Short, low.level));
            }
        }
        None
    }

    // ─── Lower timeframe ──────────────────────────────────────────────────────

    pub fn on_lower_bar(&mut self, bar: &PriceBar) -> Result<Vec<StructureEvent>, DataError> {
        self.admit(self.lower, bar)?;
        let mut events = Vec::new();

        let Some(mut setup) = self.state.take() else {
            return Ok(events);
        };
        if bar.timestamp < setup.break_timestamp {
            self.state = Some(setup);
            return Ok(events);
        }

        let direction = setup.break_direction;
        let level     = setup.last_break_level;
        let tol       = self.tolerance;
        setup.bars_since_break += 1;

        if setup.break_candle_at.is_none() {
            let beyond = match direction {
                Direction::Long  => bar.high > level,
                Direction::Short => bar.low < level,
            };
            if beyond {
                setup.break_candle_at = Some(bar.timestamp);
                events.push(StructureEvent::BreakCandle { at: bar.timestamp });
            }
        } else {
            let touched = match direction {
                Direction::Long  => bar.low <= level + tol,
                Direction::Short => bar.high >= level - tol,
            };

            if touched {
                setup.touches += 1;

                if setup.touches > self.params.max_retest_touches {
                    info!(
                        instrument = %self.instrument,
                        touches    = setup.touches,
                        level,
                        "❌ Setup invalidated: too many retest touches"
                    );
                    events.push(StructureEvent::Invalidated {
                        direction,
                        level,
                        reason: InvalidationReason::TooManyTouches,
                    });
                    return Ok(events);
                }

                if self.retest_holds(direction, level, bar) {
                    let retest_level = match direction {
                        Direction::Long  => bar.low.clamp(level - tol, level + tol),
                        Direction::Short => bar.high.clamp(level - tol, level + tol),
                    };
                    let signal = RetestSignal {
                        instrument:  self.instrument.clone(),
                        direction,
                        break_level: level,
                        retest_level,
                        detected_at: bar.timestamp + self.lower.duration(),
                    };
                    info!(
                        instrument = %self.instrument,
                        direction  = ?direction,
                        level,
                        retest_level,
                        touches    = setup.touches,
                        "🎯 Retest validated — signal ready"
                    );
                    self.last_emitted = Some((direction, level));
                    events.push(StructureEvent::Signal(signal));
                    return Ok(events);
                }

                debug!(
                    instrument = %self.instrument,
                    touches    = setup.touches,
                    momentum   = bar.momentum(),
                    "Touch without confirmation"
                );
                events.push(StructureEvent::Touch { touches: setup.touches, at: bar.timestamp });
            }
        }

        if self.params.retest_expiry_bars > 0 && setup.bars_since_break >= self.params.retest_expiry_bars {
            info!(instrument = %self.instrument, level, "⌛ Setup expired without retest");
            events.push(StructureEvent::Invalidated {
                direction,
                level,
                reason: InvalidationReason::Expired,
            });
            return Ok(events);
        }

        self.state = Some(setup);
        Ok(events)
    }

    /// Retest bar must close on the break side of the tolerance band and its
    /// momentum must not run hard against the break.
    fn retest_holds(&self, direction: Direction, level: f64, bar: &PriceBar) -> bool {
        let closes_on_side = match direction {
            Direction::Long  => bar.close >= level - self.tolerance,
            Direction::Short => bar.close <= level + self.tolerance,
        };
        let momentum_ok = direction.sign() * bar.momentum() >= -self.params.max_adverse_momentum;
        closes_on_side && momentum_ok
    }

    // ─── Ordering ─────────────────────────────────────────────────────────────

    fn admit(&mut self, timeframe: Timeframe, bar: &PriceBar) -> Result<(), DataError> {
        if let Some(reason) = bar.defect() {
            return Err(DataError::Malformed {
                instrument: self.instrument.clone(),
                timeframe,
                at: bar.timestamp,
                reason,
            });
        }

        let is_higher = timeframe == self.higher;
        let last = if is_higher { self.last_higher } else { self.last_lower };
        if let Some(prev) = last {
            if bar.timestamp <= prev {
                return Err(DataError::OutOfOrder {
                    instrument: self.instrument.clone(),
                    timeframe,
                    last:       prev,
                    received:   bar.timestamp,
                });
            }
        }

        if is_higher {
            self.last_higher = Some(bar.timestamp);
        } else {
            self.last_lower = Some(bar.timestamp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const UNIT: f64 = 0.0001;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap()
    }

    fn htf(i: i64, o: f64, h: f64, l: f64, c: f64) -> PriceBar {
        PriceBar::new(base() + Duration::hours(i), o, h, l, c)
    }

    fn ltf(minutes_after_break: i64, o: f64, h: f64, l: f64, c: f64) -> PriceBar {
        PriceBar::new(base() + Duration::hours(6) + Duration::minutes(minutes_after_break), o, h, l, c)
    }

    fn detector(params: StructureParams) -> StructureSignalDetector {
        StructureSignalDetector::new("EURUSD", Timeframe::H1, Timeframe::M5, params, UNIT)
    }

    /// Swing high at 1.1010 (bar 2), broken by bar 5's close at 1.1025.
    fn bullish_break(d: &mut StructureSignalDetector) -> Vec<StructureEvent> {
        let bars = [
            htf(0, 1.0990, 1.0995, 1.0980, 1.0992),
            htf(1, 1.0992, 1.1000, 1.0985, 1.0998),
            htf(2, 1.0998, 1.1010, 1.0990, 1.1002),
            htf(3, 1.1002, 1.1004, 1.0988, 1.0995),
            htf(4, 1.0995, 1.1000, 1.0986, 1.0998),
            htf(5, 1.0998, 1.1030, 1.0996, 1.1025),
        ];
        bars.iter().flat_map(|b| d.on_higher_bar(b).unwrap()).collect()
    }

    fn signals(events: &[StructureEvent]) -> Vec<&RetestSignal> {
        events
            .iter()
            .filter_map(|e| match e {
                StructureEvent::Signal(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn break_then_retest_emits_one_signal() {
        let mut d = detector(StructureParams::default());
        let events = bullish_break(&mut d);
        assert!(matches!(
            events.as_slice(),
            [StructureEvent::Break { direction: Direction::Long, .. }]
        ));
        assert!(d.is_awaiting_retest());

        let mut all = Vec::new();
        all.extend(d.on_lower_bar(&ltf(0, 1.1025, 1.1035, 1.1020, 1.1030)).unwrap());
        all.extend(d.on_lower_bar(&ltf(5, 1.1030, 1.1032, 1.1018, 1.1020)).unwrap());
        all.extend(d.on_lower_bar(&ltf(10, 1.1020, 1.1022, 1.1011, 1.1019)).unwrap());

        assert!(matches!(all[0], StructureEvent::BreakCandle { .. }));
        let sigs = signals(&all);
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].direction, Direction::Long);
        assert!((sigs[0].break_level - 1.1010).abs() < 1e-12);
        assert!((sigs[0].retest_level - 1.1011).abs() < 1e-12);
        assert!(!d.is_awaiting_retest());
    }

    #[test]
    fn duplicate_bar_is_rejected_and_does_not_re_emit() {
        let mut d = detector(StructureParams::default());
        bullish_break(&mut d);
        d.on_lower_bar(&ltf(0, 1.1025, 1.1035, 1.1020, 1.1030)).unwrap();
        let retest = ltf(10, 1.1020, 1.1022, 1.1011, 1.1019);
        assert_eq!(signals(&d.on_lower_bar(&retest).unwrap()).len(), 1);

        let err = d.on_lower_bar(&retest).unwrap_err();
        assert!(matches!(err, DataError::OutOfOrder { .. }));
    }

    #[test]
    fn out_of_order_higher_bar_leaves_state_untouched() {
        let mut d = detector(StructureParams::default());
        bullish_break(&mut d);
        let before = d.state().cloned();
        let err = d.on_higher_bar(&htf(3, 1.1, 1.1, 1.1, 1.1)).unwrap_err();
        assert!(matches!(err, DataError::OutOfOrder { .. }));
        assert_eq!(d.state().cloned(), before);
    }

    #[test]
    fn malformed_bar_is_rejected() {
        let mut d = detector(StructureParams::default());
        let err = d.on_higher_bar(&htf(0, 1.1, 1.0, 1.2, 1.1)).unwrap_err();
        assert!(matches!(err, DataError::Malformed { .. }));
    }

    #[test]
    fn opposing_break_invalidates_setup() {
        let mut d = detector(StructureParams::default());
        bullish_break(&mut d);

        let mut events = Vec::new();
        // bar 6 confirms the swing low at 1.0986 (bar 4); bar 7 closes below it
        for b in [
            htf(6, 1.1025, 1.1028, 1.1000, 1.1005),
            htf(7, 1.1005, 1.1010, 1.0970, 1.0980),
        ] {
            events.extend(d.on_higher_bar(&b).unwrap());
        }

        assert!(events.iter().any(|e| matches!(
            e,
            StructureEvent::Invalidated { reason: InvalidationReason::OpposingBreak, .. }
        )));
        assert!(!d.is_awaiting_retest());
    }

    #[test]
    fn adverse_momentum_touch_counts_and_excess_invalidates() {
        let params = StructureParams { max_retest_touches: 1, ..StructureParams::default() };
        let mut d = detector(params);
        bullish_break(&mut d);
        d.on_lower_bar(&ltf(0, 1.1025, 1.1035, 1.1020, 1.1030)).unwrap();

        // bearish body of 80% of range: touch, no signal
        let first = d.on_lower_bar(&ltf(5, 1.1020, 1.1021, 1.1011, 1.1012)).unwrap();
        assert!(matches!(first.as_slice(), [StructureEvent::Touch { touches: 1, .. }]));

        let second = d.on_lower_bar(&ltf(10, 1.1012, 1.1020, 1.1010, 1.1018)).unwrap();
        assert!(matches!(
            second.as_slice(),
            [StructureEvent::Invalidated { reason: InvalidationReason::TooManyTouches, .. }]
        ));
    }

    #[test]
    fn setup_expires() {
        let params = StructureParams { retest_expiry_bars: 2, ..StructureParams::default() };
        let mut d = detector(params);
        bullish_break(&mut d);
        d.on_lower_bar(&ltf(0, 1.1025, 1.1035, 1.1020, 1.1030)).unwrap();
        let events = d.on_lower_bar(&ltf(5, 1.1030, 1.1040, 1.1028, 1.1038)).unwrap();
        assert!(matches!(
            events.as_slice(),
            [StructureEvent::Invalidated { reason: InvalidationReason::Expired, .. }]
        ));
    }

    #[test]
    fn bars_before_break_close_are_ignored() {
        let mut d = detector(StructureParams::default());
        bullish_break(&mut d);
        // inside the breaking H1 bar (05:00–06:00)
        let early = PriceBar::new(base() + Duration::hours(5) + Duration::minutes(30), 1.1020, 1.1030, 1.1005, 1.1025);
        assert!(d.on_lower_bar(&early).unwrap().is_empty());
        assert!(d.state().map(|s| s.break_candle_at.is_none()).unwrap_or(false));
    }
}
