//! # engine::atr
//!
//! Rolling average true range over the lower-timeframe bars. Used as the
//! volatility measure when no external value has been pushed for an
//! instrument.

use std::collections::VecDeque;

use crate::models::PriceBar;

#[derive(Debug, Clone)]
pub struct AverageTrueRange {
    period:     usize,
    prev_close: Option<f64>,
    window:     VecDeque<f64>,
    sum:        f64,
}

impl AverageTrueRange {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            prev_close: None,
            window:     VecDeque::with_capacity(period + 1),
            sum:        0.0,
        }
    }

    /// Feed one bar; returns the average once `period` true ranges are known.
    pub fn update(&mut self, bar: &PriceBar) -> Option<f64> {
        let tr = bar.true_range(self.prev_close);
        self.prev_close = Some(bar.close);

        self.window.push_back(tr);
        self.sum += tr;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.window.len() < self.period {
            return None;
        }
        Some((self.sum / self.period as f64).max(0.0))
    }
}
