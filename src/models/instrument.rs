//! # models::instrument
//!
//! Instrument definitions and the per-class normalized price unit.
//!
//! A *unit* is one pip-equivalent in the instrument's native price scale:
//! `0.0001` for most FX pairs, `0.01` for JPY crosses, `0.1` for gold and so
//! on. Everything that must behave identically across asset classes (entry
//! offset, retest tolerance, volatility band) is configured in units and
//! converted through [`InstrumentRegistry::unit_of`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─── InstrumentClass ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentClass {
    Forex,
    ForexJpy,
    Metal,
    Index,
    Crypto,
}

impl InstrumentClass {
    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentClass::Forex    => "forex",
            InstrumentClass::ForexJpy => "forex_jpy",
            InstrumentClass::Metal    => "metal",
            InstrumentClass::Index    => "index",
            InstrumentClass::Crypto   => "crypto",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forex" | "fx"            => Ok(InstrumentClass::Forex),
            "forex_jpy" | "fx_jpy"    => Ok(InstrumentClass::ForexJpy),
            "metal" | "metals"        => Ok(InstrumentClass::Metal),
            "index" | "indices"       => Ok(InstrumentClass::Index),
            "crypto"                  => Ok(InstrumentClass::Crypto),
            other => Err(format!("unknown instrument class '{other}'")),
        }
    }
}

// ─── InstrumentSpec ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Broker symbol, e.g. `"EURUSD"`.
    pub symbol: String,
    pub class: InstrumentClass,
    /// Account-currency value of a 1.0 move in price for one lot.
    pub contract_size: f64,
    /// Smallest size increment accepted by the broker.
    pub lot_step: f64,
    pub min_lot: f64,
}

impl InstrumentSpec {
    pub fn new(symbol: &str, class: InstrumentClass, contract_size: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            class,
            contract_size,
            lot_step: 0.01,
            min_lot: 0.01,
        }
    }

    /// Largest lot-step multiple whose loss at `loss_per_lot` stays within
    /// `budget`. Always rounds down.
    pub fn floor_size_for_budget(&self, budget: f64, loss_per_lot: f64) -> f64 {
        if !(budget > 0.0) || !(loss_per_lot > 0.0) {
            return 0.0;
        }
        let raw = budget / loss_per_lot;
        if self.lot_step <= 0.0 {
            return raw;
        }
        let mut steps = (raw / self.lot_step).floor();
        // float noise in steps * lot_step must never push the loss over budget
        while steps > 0.0 && steps * self.lot_step * loss_per_lot > budget {
            steps -= 1.0;
        }
        steps * self.lot_step
    }

    fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("empty symbol".into());
        }
        if !(self.contract_size > 0.0) {
            return Err(format!("{}: contract_size must be > 0", self.symbol));
        }
        if !(self.lot_step > 0.0) || !(self.min_lot > 0.0) {
            return Err(format!("{}: lot_step and min_lot must be > 0", self.symbol));
        }
        Ok(())
    }
}

// ─── InstrumentRegistry ───────────────────────────────────────────────────────

/// Instrument table plus the `unit_offset_per_instrument_class` mapping.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    instruments: HashMap<String, InstrumentSpec>,
    class_units: HashMap<InstrumentClass, f64>,
}

impl InstrumentRegistry {
    pub fn new(
        specs: Vec<InstrumentSpec>,
        class_units: HashMap<InstrumentClass, f64>,
    ) -> Result<Self, ConfigError> {
        for (class, unit) in &class_units {
            if !(*unit > 0.0) || !unit.is_finite() {
                return Err(ConfigError::Invalid {
                    key:    "UNIT_OFFSET_PER_CLASS".into(),
                    value:  format!("{class}={unit}"),
                    reason: "unit must be a positive number".into(),
                });
            }
        }

        let mut instruments = HashMap::with_capacity(specs.len());
        for spec in specs {
            spec.validate().map_err(|reason| ConfigError::Instruments { reason })?;
            instruments.insert(spec.symbol.clone(), spec);
        }

        Ok(Self { instruments, class_units })
    }

    /// Built-in table used when no instruments file is configured.
    pub fn default_specs() -> Vec<InstrumentSpec> {
        vec![
            InstrumentSpec::new("EURUSD", InstrumentClass::Forex, 100_000.0),
            InstrumentSpec::new("GBPUSD", InstrumentClass::Forex, 100_000.0),
            InstrumentSpec::new("AUDUSD", InstrumentClass::Forex, 100_000.0),
            InstrumentSpec::new("USDJPY", InstrumentClass::ForexJpy, 1_000.0),
            InstrumentSpec::new("XAUUSD", InstrumentClass::Metal, 100.0),
            InstrumentSpec::new("NAS100", InstrumentClass::Index, 1.0),
            InstrumentSpec::new("BTCUSD", InstrumentClass::Crypto, 1.0),
        ]
    }

    pub fn default_class_units() -> HashMap<InstrumentClass, f64> {
        HashMap::from([
            (InstrumentClass::Forex, 0.0001),
            (InstrumentClass::ForexJpy, 0.01),
            (InstrumentClass::Metal, 0.1),
            (InstrumentClass::Index, 1.0),
            (InstrumentClass::Crypto, 1.0),
        ])
    }

    pub fn spec(&self, symbol: &str) -> Result<&InstrumentSpec, ConfigError> {
        self.instruments
            .get(symbol)
            .ok_or_else(|| ConfigError::InvalidInstrumentUnit {
                instrument: symbol.to_string(),
                reason:     "instrument is not defined".into(),
            })
    }

    /// Native price size of one normalized unit for `symbol`.
    pub fn unit_of(&self, symbol: &str) -> Result<f64, ConfigError> {
        let spec = self.spec(symbol)?;
        self.class_units
            .get(&spec.class)
            .copied()
            .ok_or_else(|| ConfigError::InvalidInstrumentUnit {
                instrument: symbol.to_string(),
                reason:     format!("no unit defined for class '{}'", spec.class),
            })
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.instruments.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InstrumentRegistry {
        InstrumentRegistry::new(
            InstrumentRegistry::default_specs(),
            InstrumentRegistry::default_class_units(),
        )
        .unwrap()
    }

    #[test]
    fn resolves_units_per_class() {
        let reg = registry();
        assert_eq!(reg.unit_of("EURUSD").unwrap(), 0.0001);
        assert_eq!(reg.unit_of("USDJPY").unwrap(), 0.01);
        assert_eq!(reg.unit_of("XAUUSD").unwrap(), 0.1);
    }

    #[test]
    fn unknown_instrument_is_invalid_unit() {
        let err = registry().unit_of("DOGEUSD").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInstrumentUnit { .. }));
    }

    #[test]
    fn missing_class_unit_is_invalid_unit() {
        let mut units = InstrumentRegistry::default_class_units();
        units.remove(&InstrumentClass::Crypto);
        let reg = InstrumentRegistry::new(InstrumentRegistry::default_specs(), units).unwrap();
        let err = reg.unit_of("BTCUSD").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInstrumentUnit { .. }));
    }

    #[test]
    fn floor_size_never_exceeds_budget() {
        let spec = InstrumentSpec::new("EURUSD", InstrumentClass::Forex, 100_000.0);
        // 550 budget, 10 pip stop = 100 per lot → 5.5 lots exactly
        let size = spec.floor_size_for_budget(550.0, 100.0);
        assert!((size - 5.5).abs() < 1e-9);
        assert!(size * 100.0 <= 550.0);

        let size = spec.floor_size_for_budget(557.0, 100.0);
        assert!(size * 100.0 <= 557.0);
        assert!(size >= 5.56 - 1e-9);

        let size = spec.floor_size_for_budget(0.5, 100.0);
        assert_eq!(size, 0.0);
    }
}
