//! # config
//!
//! Pipeline and service configuration, read from the environment (a `.env`
//! file is loaded by `main` through `dotenvy`).
//!
//! Every key has a typed default. A key that is present but does not parse,
//! or a combination that makes no sense, is a [`ConfigError`]; `main` treats
//! that as fatal before any pipeline starts.
//!
//! | Key                                  | Default                     |
//! |--------------------------------------|-----------------------------|
//! | `RISK_PER_TRADE_FRACTION`            | `0.0055`                    |
//! | `RISK_CEILING_FRACTION`              | = risk per trade            |
//! | `DAILY_LOSS_LIMIT_FRACTION`          | `0.05`                      |
//! | `MAX_DRAWDOWN_FRACTION`              | `0.10`                      |
//! | `MAX_CONCURRENT_POSITIONS`           | `3`                         |
//! | `MAX_OPEN_RISK_FRACTION`             | `0.02`                      |
//! | `VOLATILITY_BAND_MIN` / `_MAX`       | `5` / `150` units           |
//! | `WEEKLY_PROFIT_ACTIVATION_THRESHOLD` | `0.10`                      |
//! | `CONSISTENCY_RULE_FRACTION`          | `0.30`                      |
//! | `CONSISTENCY_WINDOW_DAYS`            | `30`                        |
//! | `UNIT_OFFSET_PER_CLASS`              | `forex=0.0001,forex_jpy=0.01,...` |
//! | `ENTRY_OFFSET_UNITS`                 | `1.0`                       |
//! | `DAY_BOUNDARY_HOUR_UTC`              | `0`                         |
//! | `HIGHER_TIMEFRAME` / `LOWER_TIMEFRAME` | `H1` / `M5`               |
//! | `ATR_PERIOD`                         | `14`                        |
//! | `INSTRUMENTS_FILE`                   | built-in table              |

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::engine::structure::StructureParams;
use crate::engine::{EntryTriggerCalculator, VolatilityPositionSizer};
use crate::error::ConfigError;
use crate::models::{InstrumentClass, InstrumentRegistry, InstrumentSpec, PeriodClock, Timeframe};
use crate::risk::ComplianceLimits;

// ─── Pipeline ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub risk_per_trade_fraction:            f64,
    pub risk_ceiling_fraction:              f64,
    pub daily_loss_limit_fraction:          f64,
    pub max_drawdown_fraction:              f64,
    pub max_concurrent_positions:           usize,
    pub max_open_risk_fraction:             f64,
    pub volatility_band_min:                f64,
    pub volatility_band_max:                f64,
    pub weekly_profit_activation_threshold: f64,
    pub consistency_rule_fraction:          f64,
    pub consistency_window_days:            u32,
    pub unit_offset_per_instrument_class:   HashMap<InstrumentClass, f64>,
    pub entry_offset_units:                 f64,
    pub day_boundary_hour_utc:              u32,
    pub higher_timeframe:                   Timeframe,
    pub lower_timeframe:                    Timeframe,
    pub atr_period:                         usize,
    pub structure:                          StructureParams,
    pub instruments_file:                   Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_fraction:            0.0055,
            risk_ceiling_fraction:              0.0055,
            daily_loss_limit_fraction:          0.05,
            max_drawdown_fraction:              0.10,
            max_concurrent_positions:           3,
            max_open_risk_fraction:             0.02,
            volatility_band_min:                5.0,
            volatility_band_max:                150.0,
            weekly_profit_activation_threshold: 0.10,
            consistency_rule_fraction:          0.30,
            consistency_window_days:            30,
            unit_offset_per_instrument_class:   InstrumentRegistry::default_class_units(),
            entry_offset_units:                 1.0,
            day_boundary_hour_utc:              0,
            higher_timeframe:                   Timeframe::H1,
            lower_timeframe:                    Timeframe::M5,
            atr_period:                         14,
            structure:                          StructureParams::default(),
            instruments_file:                   None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let d = Self::default();
        let ds = d.structure;

        let risk_per_trade_fraction = env.parse("RISK_PER_TRADE_FRACTION", d.risk_per_trade_fraction)?;

        let mut units = d.unit_offset_per_instrument_class;
        if let Some(raw) = env.raw("UNIT_OFFSET_PER_CLASS") {
            units.extend(parse_class_units(&raw)?);
        }

        let config = Self {
            risk_per_trade_fraction,
            risk_ceiling_fraction:              env.parse("RISK_CEILING_FRACTION", risk_per_trade_fraction)?,
            daily_loss_limit_fraction:          env.parse("DAILY_LOSS_LIMIT_FRACTION", d.daily_loss_limit_fraction)?,
            max_drawdown_fraction:              env.parse("MAX_DRAWDOWN_FRACTION", d.max_drawdown_fraction)?,
            max_concurrent_positions:           env.parse("MAX_CONCURRENT_POSITIONS", d.max_concurrent_positions)?,
            max_open_risk_fraction:             env.parse("MAX_OPEN_RISK_FRACTION", d.max_open_risk_fraction)?,
            volatility_band_min:                env.parse("VOLATILITY_BAND_MIN", d.volatility_band_min)?,
            volatility_band_max:                env.parse("VOLATILITY_BAND_MAX", d.volatility_band_max)?,
            weekly_profit_activation_threshold: env.parse("WEEKLY_PROFIT_ACTIVATION_THRESHOLD", d.weekly_profit_activation_threshold)?,
            consistency_rule_fraction:          env.parse("CONSISTENCY_RULE_FRACTION", d.consistency_rule_fraction)?,
            consistency_window_days:            env.parse("CONSISTENCY_WINDOW_DAYS", d.consistency_window_days)?,
            unit_offset_per_instrument_class:   units,
            entry_offset_units:                 env.parse("ENTRY_OFFSET_UNITS", d.entry_offset_units)?,
            day_boundary_hour_utc:              env.parse("DAY_BOUNDARY_HOUR_UTC", d.day_boundary_hour_utc)?,
            higher_timeframe:                   env.parse("HIGHER_TIMEFRAME", d.higher_timeframe)?,
            lower_timeframe:                    env.parse("LOWER_TIMEFRAME", d.lower_timeframe)?,
            atr_period:                         env.parse("ATR_PERIOD", d.atr_period)?,
            structure: StructureParams {
                swing_strength:         env.parse("SWING_STRENGTH", ds.swing_strength)?,
                retest_tolerance_units: env.parse("RETEST_TOLERANCE_UNITS", ds.retest_tolerance_units)?,
                max_retest_touches:     env.parse("MAX_RETEST_TOUCHES", ds.max_retest_touches)?,
                max_adverse_momentum:   env.parse("MAX_ADVERSE_MOMENTUM", ds.max_adverse_momentum)?,
                retest_expiry_bars:     env.parse("RETEST_EXPIRY_BARS", ds.retest_expiry_bars)?,
            },
            instruments_file: env.raw("INSTRUMENTS_FILE").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fractions = [
            ("RISK_PER_TRADE_FRACTION", self.risk_per_trade_fraction),
            ("RISK_CEILING_FRACTION", self.risk_ceiling_fraction),
            ("DAILY_LOSS_LIMIT_FRACTION", self.daily_loss_limit_fraction),
            ("MAX_DRAWDOWN_FRACTION", self.max_drawdown_fraction),
            ("MAX_OPEN_RISK_FRACTION", self.max_open_risk_fraction),
            ("WEEKLY_PROFIT_ACTIVATION_THRESHOLD", self.weekly_profit_activation_threshold),
            ("CONSISTENCY_RULE_FRACTION", self.consistency_rule_fraction),
        ];
        for (key, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(key, value, "must be in (0, 1]"));
            }
        }

        if self.risk_ceiling_fraction < self.risk_per_trade_fraction {
            return Err(ConfigError::Inconsistent(format!(
                "risk ceiling {} is below the fixed risk per trade {}",
                self.risk_ceiling_fraction, self.risk_per_trade_fraction
            )));
        }
        if self.max_open_risk_fraction < self.risk_per_trade_fraction {
            return Err(ConfigError::Inconsistent(format!(
                "open-risk cap {} cannot hold a single trade at {}",
                self.max_open_risk_fraction, self.risk_per_trade_fraction
            )));
        }
        if !(self.volatility_band_min > 0.0) || !(self.volatility_band_max >= self.volatility_band_min) {
            return Err(ConfigError::Inconsistent(format!(
                "volatility band [{}, {}] is empty or non-positive",
                self.volatility_band_min, self.volatility_band_max
            )));
        }
        if self.higher_timeframe <= self.lower_timeframe {
            return Err(ConfigError::Inconsistent(format!(
                "higher timeframe {} must be above lower timeframe {}",
                self.higher_timeframe, self.lower_timeframe
            )));
        }
        if self.day_boundary_hour_utc > 23 {
            return Err(invalid("DAY_BOUNDARY_HOUR_UTC", self.day_boundary_hour_utc, "must be 0..=23"));
        }
        if self.consistency_window_days == 0 {
            return Err(invalid("CONSISTENCY_WINDOW_DAYS", 0, "must be at least 1"));
        }
        if self.atr_period == 0 {
            return Err(invalid("ATR_PERIOD", 0, "must be at least 1"));
        }
        if !(self.entry_offset_units >= 0.0) || !self.entry_offset_units.is_finite() {
            return Err(invalid("ENTRY_OFFSET_UNITS", self.entry_offset_units, "must be a finite value >= 0"));
        }

        let s = &self.structure;
        if s.swing_strength == 0 {
            return Err(invalid("SWING_STRENGTH", 0, "must be at least 1"));
        }
        if !(s.retest_tolerance_units >= 0.0) {
            return Err(invalid("RETEST_TOLERANCE_UNITS", s.retest_tolerance_units, "must be >= 0"));
        }
        if !(0.0..=1.0).contains(&s.max_adverse_momentum) {
            return Err(invalid("MAX_ADVERSE_MOMENTUM", s.max_adverse_momentum, "must be in [0, 1]"));
        }
        Ok(())
    }

    /// Instrument table from `INSTRUMENTS_FILE`, or the built-in defaults.
    pub fn registry(&self) -> Result<InstrumentRegistry, ConfigError> {
        let specs = match &self.instruments_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Instruments {
                    reason: format!("{}: {e}", path.display()),
                })?;
                serde_json::from_str::<Vec<InstrumentSpec>>(&raw).map_err(|e| ConfigError::Instruments {
                    reason: format!("{}: {e}", path.display()),
                })?
            }
            None => InstrumentRegistry::default_specs(),
        };
        InstrumentRegistry::new(specs, self.unit_offset_per_instrument_class.clone())
    }

    pub fn gate_limits(&self) -> ComplianceLimits {
        ComplianceLimits {
            daily_loss_limit_fraction: self.daily_loss_limit_fraction,
            max_drawdown_fraction:     self.max_drawdown_fraction,
            risk_ceiling_fraction:     self.risk_ceiling_fraction,
            max_concurrent_positions:  self.max_concurrent_positions,
            max_open_risk_fraction:    self.max_open_risk_fraction,
            consistency_rule_fraction: self.consistency_rule_fraction,
        }
    }

    pub fn clock(&self) -> PeriodClock {
        PeriodClock::new(self.day_boundary_hour_utc)
    }

    pub fn sizer(&self) -> VolatilityPositionSizer {
        VolatilityPositionSizer::new(
            self.volatility_band_min,
            self.volatility_band_max,
            self.risk_per_trade_fraction,
        )
    }

    pub fn trigger(&self, registry: Arc<InstrumentRegistry>) -> EntryTriggerCalculator {
        EntryTriggerCalculator::new(registry, self.entry_offset_units)
    }
}

// ─── Service ──────────────────────────────────────────────────────────────────

/// Process-level settings of the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bind_addr:          String,
    /// `"mock"` selects the in-process bridge.
    pub mt5_base_url:       String,
    pub mt5_timeout_secs:   u64,
    pub state_file:         PathBuf,
    pub save_interval_secs: u64,
    /// Equity of a fresh ledger when no saved state exists.
    pub initial_equity:     f64,
    pub feed_capacity:      usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let config = Self {
            bind_addr:          env.raw("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            mt5_base_url:       env.raw("MT5_BASE_URL").unwrap_or_else(|| "http://localhost:8081".to_string()),
            mt5_timeout_secs:   env.parse("MT5_TIMEOUT_SECS", 5)?,
            state_file:         env.raw("STATE_FILE").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data/xpws-state.json")),
            save_interval_secs: env.parse("STATE_SAVE_INTERVAL_SECS", 60)?,
            initial_equity:     env.parse("INITIAL_EQUITY", 100_000.0)?,
            feed_capacity:      env.parse("FEED_CHANNEL_CAPACITY", 1024)?,
        };
        if !(config.initial_equity > 0.0) {
            return Err(invalid("INITIAL_EQUITY", config.initial_equity, "must be > 0"));
        }
        Ok(config)
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset.
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key:    key.to_string(),
                value:  raw.clone(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}

fn invalid(key: &str, value: impl Display, reason: &str) -> ConfigError {
    ConfigError::Invalid { key: key.to_string(), value: value.to_string(), reason: reason.to_string() }
}

/// `"forex=0.0001, metal=0.1"` → class units.
pub fn parse_class_units(raw: &str) -> Result<HashMap<InstrumentClass, f64>, ConfigError> {
    let bad = |reason: String| ConfigError::Invalid {
        key:    "UNIT_OFFSET_PER_CLASS".into(),
        value:  raw.to_string(),
        reason,
    };

    let mut units = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (class, unit) = pair
            .split_once('=')
            .ok_or_else(|| bad(format!("'{pair}' is not class=unit")))?;
        let class: InstrumentClass = class.parse().map_err(bad)?;
        let unit: f64 = unit.trim().parse().map_err(|e| bad(format!("'{pair}': {e}")))?;
        if !(unit > 0.0) || !unit.is_finite() {
            return Err(bad(format!("'{pair}': unit must be a positive number")));
        }
        units.insert(class, unit);
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.gate_limits().risk_ceiling_fraction, config.risk_per_trade_fraction);
    }

    #[test]
    fn reads_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("RISK_PER_TRADE_FRACTION", "0.01"),
            ("MAX_CONCURRENT_POSITIONS", "5"),
            ("HIGHER_TIMEFRAME", "h4"),
            ("LOWER_TIMEFRAME", "M15"),
            ("UNIT_OFFSET_PER_CLASS", "metal=0.01, crypto=0.5"),
        ]))
        .unwrap();
        assert_eq!(config.risk_per_trade_fraction, 0.01);
        assert_eq!(config.risk_ceiling_fraction, 0.01);
        assert_eq!(config.max_concurrent_positions, 5);
        assert_eq!(config.higher_timeframe, Timeframe::H4);
        assert_eq!(config.unit_offset_per_instrument_class[&InstrumentClass::Metal], 0.01);
        assert_eq!(config.unit_offset_per_instrument_class[&InstrumentClass::Forex], 0.0001);
    }

    #[test]
    fn malformed_value_is_an_error() {
        let err = PipelineConfig::from_lookup(lookup(&[("DAILY_LOSS_LIMIT_FRACTION", "five")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "DAILY_LOSS_LIMIT_FRACTION"));
    }

    #[test]
    fn inverted_timeframes_are_inconsistent() {
        let err = PipelineConfig::from_lookup(lookup(&[
            ("HIGHER_TIMEFRAME", "M5"),
            ("LOWER_TIMEFRAME", "H1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn bad_class_unit_is_rejected() {
        assert!(parse_class_units("forex=0").is_err());
        assert!(parse_class_units("plasma=1").is_err());
        assert!(parse_class_units("forex").is_err());
    }

    #[test]
    fn instruments_file_replaces_builtin_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instruments.json");
        std::fs::write(
            &path,
            r#"[{"symbol":"US30","class":"index","contract_size":1.0,"lot_step":0.1,"min_lot":0.1}]"#,
        )
        .unwrap();
        let config = PipelineConfig { instruments_file: Some(path), ..PipelineConfig::default() };
        let registry = config.registry().unwrap();
        assert_eq!(registry.unit_of("US30").unwrap(), 1.0);
        assert!(registry.spec("EURUSD").is_err());
    }

    #[test]
    fn service_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[("MT5_BASE_URL", "mock")])).unwrap();
        assert_eq!(config.mt5_base_url, "mock");
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }
}
