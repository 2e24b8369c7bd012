//! # models::bar
//!
//! [`PriceBar`] is the unit of market data the pipeline consumes. Bars arrive
//! per (instrument, [`Timeframe`]) from the data-feed collaborator and are
//! immutable once received.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ─── Timeframe ────────────────────────────────────────────────────────────────

/// Bar resolution. Declaration order is also duration order, so `Ord` can be
/// used to check that a higher timeframe really is higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn duration(self) -> Duration {
        match self {
            Timeframe::M1  => Duration::minutes(1),
            Timeframe::M5  => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1  => Duration::hours(1),
            Timeframe::H4  => Duration::hours(4),
            Timeframe::D1  => Duration::days(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1  => "M1",
            Timeframe::M5  => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1  => "H1",
            Timeframe::H4  => "H4",
            Timeframe::D1  => "D1",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1"  => Ok(Timeframe::M1),
            "M5"  => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1"  => Ok(Timeframe::H1),
            "H4"  => Ok(Timeframe::H4),
            "D1"  => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

// ─── PriceBar ─────────────────────────────────────────────────────────────────

/// One OHLCV bar. `timestamp` is the bar's open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open:      f64,
    pub high:      f64,
    pub low:       f64,
    pub close:     f64,
    #[serde(default)]
    pub volume:    f64,
}

impl PriceBar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self { timestamp, open, high, low, close, volume: 0.0 }
    }

    /// Returns the reason the bar cannot be used, or `None` if it is sound.
    pub fn defect(&self) -> Option<&'static str> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Some("non-finite field");
        }
        if self.high < self.low {
            return Some("high below low");
        }
        if self.open > self.high || self.open < self.low {
            return Some("open outside range");
        }
        if self.close > self.high || self.close < self.low {
            return Some("close outside range");
        }
        if self.volume < 0.0 {
            return Some("negative volume");
        }
        None
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Momentum proxy in `[-1, 1]`: signed body size relative to the range.
    /// A doji or zero-range bar reads as neutral.
    pub fn momentum(&self) -> f64 {
        let range = self.range();
        if range <= 0.0 {
            0.0
        } else {
            (self.close - self.open) / range
        }
    }

    /// True range against the previous close (Wilder).
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => self.range().max((self.high - pc).abs()).max((self.low - pc).abs()),
            None => self.range(),
        }
    }
}
