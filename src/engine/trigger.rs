//! # engine::trigger
//!
//! **Entry Trigger Calculator**: prices a validated retest.
//!
//! `trigger = retest_level + sign(direction) × entry_offset_units × unit(class)`
//!
//! The offset is the same number of normalized units for every asset class;
//! only its expression in native price differs (0.0001 on EURUSD, 0.01 on
//! USDJPY, 0.1 on XAUUSD, ...). Pure: no state, no side effects.

use std::sync::Arc;

use crate::error::ConfigError;
use crate::models::{CandidateSignal, Direction, InstrumentRegistry, RetestSignal};

#[derive(Debug, Clone)]
pub struct EntryTriggerCalculator {
    registry:           Arc<InstrumentRegistry>,
    entry_offset_units: f64,
}

impl EntryTriggerCalculator {
    pub fn new(registry: Arc<InstrumentRegistry>, entry_offset_units: f64) -> Self {
        Self { registry, entry_offset_units }
    }

    pub fn trigger_price(
        &self,
        instrument:   &str,
        direction:    Direction,
        retest_level: f64,
    ) -> Result<f64, ConfigError> {
        let unit = self.registry.unit_of(instrument)?;
        Ok(retest_level + direction.sign() * self.entry_offset_units * unit)
    }

    pub fn price(&self, retest: RetestSignal) -> Result<CandidateSignal, ConfigError> {
        let trigger = self.trigger_price(&retest.instrument, retest.direction, retest.retest_level)?;
        Ok(CandidateSignal::priced(retest, trigger))
    }
}
