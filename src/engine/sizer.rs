//! # engine::sizer
//!
//! **Volatility Position Sizer**: stop distance and size from a volatility
//! measure.
//!
//! ```text
//! stop      = entry − sign × volatility
//! size      = floor_to_lot_step(equity × risk_per_trade / (volatility × contract_size))
//! take_prof = 1:1 (opening rule of the lifecycle manager)
//! ```
//!
//! The volatility band is a hard filter: measures outside it (in normalized
//! units) never reach the compliance gate.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::lifecycle::initial_take_profit;
use crate::error::ValidationRejection;
use crate::models::{CandidateSignal, InstrumentSpec, SizedOrder};

/// Slack on the inclusive band edges for float noise in `measure / unit`.
const BAND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityPositionSizer {
    pub band_min_units:          f64,
    pub band_max_units:          f64,
    pub risk_per_trade_fraction: f64,
}

impl VolatilityPositionSizer {
    pub fn new(band_min_units: f64, band_max_units: f64, risk_per_trade_fraction: f64) -> Self {
        Self { band_min_units, band_max_units, risk_per_trade_fraction }
    }

    /// `volatility` is in native price units; `unit` is the instrument's
    /// normalized unit.
    pub fn size(
        &self,
        signal:     CandidateSignal,
        volatility: f64,
        equity:     f64,
        spec:       &InstrumentSpec,
        unit:       f64,
    ) -> Result<SizedOrder, ValidationRejection> {
        if !(equity > 0.0) {
            return Err(ValidationRejection::NonPositiveEquity { equity });
        }

        let units = volatility / unit;
        if !volatility.is_finite()
            || !(volatility > 0.0)
            || units < self.band_min_units - BAND_EPSILON
            || units > self.band_max_units + BAND_EPSILON
        {
            return Err(ValidationRejection::VolatilityOutOfRange {
                units,
                min: self.band_min_units,
                max: self.band_max_units,
            });
        }

        let entry        = signal.trigger_price;
        let direction    = signal.direction;
        let stop         = entry - direction.sign() * volatility;
        let loss_per_lot = volatility * spec.contract_size;
        let budget       = equity * self.risk_per_trade_fraction;

        let size = spec.floor_size_for_budget(budget, loss_per_lot);
        if size < spec.min_lot - BAND_EPSILON {
            return Err(ValidationRejection::SizeBelowMinimum { size, min_lot: spec.min_lot });
        }

        let take_profit = initial_take_profit(direction, entry, stop);
        let risk_fraction = size * loss_per_lot / equity;

        debug!(
            instrument = %signal.instrument,
            entry,
            stop,
            take_profit,
            size,
            units,
            risk_fraction,
            "Sized candidate"
        );

        Ok(SizedOrder {
            signal,
            stop_loss_price:         stop,
            take_profit_price:       take_profit,
            position_size:           size,
            risk_fraction_of_equity: risk_fraction,
            loss_per_lot,
        })
    }
}
