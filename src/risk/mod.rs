//! # risk
//!
//! Last line before an order leaves the process. Pure decision function over
//! the account, the candidate and the consistency ledger.
//!
//! ## Checks, in order
//! 1. **Daily loss**: realized today minus projected loss must stay above the limit
//! 2. **Max drawdown**: drawdown from peak plus projected loss must stay under the limit
//! 3. **Per-trade ceiling**: candidate risk vs. *current* equity; downsize if over
//! 4. **Concentration**: position count (reject) and aggregate open risk (downsize)
//! 5. **Consistency**: advisory only, never blocks
//!
//! *Projected loss* is the candidate's loss at its stop plus what every open
//! position and pending reservation still has at stake.

pub mod consistency;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ComplianceRejection;
use crate::models::{AccountState, DayId, InstrumentSpec, PositionMode, SizedOrder};

pub use consistency::{ConsistencyLedger, ConsistencyReport};

/// Slack for float noise when comparing money amounts.
const MONEY_EPSILON: f64 = 1e-9;

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplianceLimits {
    /// Fraction of the day's starting equity that may be lost in one day.
    pub daily_loss_limit_fraction: f64,
    /// Fraction of the running equity peak that may be lost overall.
    pub max_drawdown_fraction:     f64,
    /// Largest loss at stop for one trade, relative to current equity.
    pub risk_ceiling_fraction:     f64,
    /// Open + pending positions (0 = unlimited).
    pub max_concurrent_positions:  usize,
    /// Aggregate loss at stop across open, pending and the candidate.
    pub max_open_risk_fraction:    f64,
    /// Largest share of window profit a single day may carry.
    pub consistency_rule_fraction: f64,
}

// ─── Decision ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceRule {
    DailyLoss,
    MaxDrawdown,
    RiskCeiling,
    PositionCount,
    OpenRisk,
    Consistency,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComplianceDecision {
    Approved,
    /// Approved at a smaller size.
    Modified { size: f64, risk_fraction: f64, rule: ComplianceRule },
    Rejected(ComplianceRejection),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Advisory {
    /// Today would become the single largest day above the allowed share.
    Consistency {
        projected_day_profit: f64,
        window_profit:        f64,
        ratio:                f64,
        limit:                f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub decision:   ComplianceDecision,
    pub advisories: Vec<Advisory>,
    /// Mode the position will be frozen with if it opens.
    pub mode:       PositionMode,
}

impl Assessment {
    fn rejected(reason: ComplianceRejection, mode: PositionMode) -> Self {
        Self { decision: ComplianceDecision::Rejected(reason), advisories: Vec::new(), mode }
    }
}

/// Everything the gate reads for one candidate.
pub struct GateInput<'a> {
    pub account:     &'a AccountState,
    pub order:       &'a SizedOrder,
    pub spec:        &'a InstrumentSpec,
    pub consistency: &'a ConsistencyLedger,
    pub today:       DayId,
    pub mode:        PositionMode,
}

// ─── Gate ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ComplianceGate {
    limits: ComplianceLimits,
}

impl ComplianceGate {
    pub fn new(limits: ComplianceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ComplianceLimits {
        &self.limits
    }

    pub fn evaluate(&self, input: &GateInput<'_>) -> Assessment {
        let GateInput { account, order, spec, consistency, today, mode } = *input;
        let limits = &self.limits;

        let equity         = account.equity;
        let loss_per_lot   = order.loss_per_lot;
        let candidate_loss = order.worst_case_loss();
        let open_risk      = account.open_risk();
        let projected      = open_risk + candidate_loss;

        // [1] Daily loss
        let daily_limit = limits.daily_loss_limit_fraction * account.daily_start_equity();
        let realized    = account.daily_realized_pnl();
        if realized - projected < -daily_limit - MONEY_EPSILON {
            warn!(
                instrument = %order.signal.instrument,
                realized,
                projected,
                limit      = daily_limit,
                "⛔ Compliance: daily loss limit"
            );
            return Assessment::rejected(
                ComplianceRejection::DailyLossLimit {
                    realized,
                    projected_loss: projected,
                    limit:          daily_limit,
                },
                mode,
            );
        }

        // [2] Maximum drawdown
        let dd_limit = limits.max_drawdown_fraction * account.running_max_equity;
        let drawdown = account.drawdown();
        if drawdown + projected > dd_limit + MONEY_EPSILON {
            warn!(
                instrument = %order.signal.instrument,
                drawdown,
                projected,
                limit      = dd_limit,
                "⛔ Compliance: max drawdown"
            );
            return Assessment::rejected(
                ComplianceRejection::MaxDrawdown { drawdown, projected_loss: projected, limit: dd_limit },
                mode,
            );
        }

        if !(equity > 0.0) {
            return Assessment::rejected(ComplianceRejection::NonPositiveEquity { equity }, mode);
        }

        let mut size = order.position_size;
        let mut modified_by = None;

        // [3] Per-trade ceiling
        let ceiling = limits.risk_ceiling_fraction * equity;
        if size * loss_per_lot > ceiling + MONEY_EPSILON {
            size = spec.floor_size_for_budget(ceiling, loss_per_lot);
            modified_by = Some(ComplianceRule::RiskCeiling);
            debug!(size, ceiling, "Compliance: downsized to per-trade ceiling");
        }

        // [4a] Position count
        let count = account.position_count();
        if limits.max_concurrent_positions > 0 && count + 1 > limits.max_concurrent_positions {
            warn!(open = count, max = limits.max_concurrent_positions, "⛔ Compliance: position limit");
            return Assessment::rejected(
                ComplianceRejection::MaxConcurrentPositions {
                    open: count,
                    max:  limits.max_concurrent_positions,
                },
                mode,
            );
        }

        // [4b] Aggregate open risk
        let cap  = limits.max_open_risk_fraction * equity;
        let room = cap - open_risk;
        if room <= MONEY_EPSILON {
            warn!(open_risk, cap, "⛔ Compliance: open risk exhausted");
            return Assessment::rejected(ComplianceRejection::OpenRiskExhausted { open_risk, cap }, mode);
        }
        if size * loss_per_lot > room + MONEY_EPSILON {
            size = spec.floor_size_for_budget(room, loss_per_lot);
            modified_by = Some(ComplianceRule::OpenRisk);
            debug!(size, room, "Compliance: downsized to open-risk cap");
        }

        if let Some(rule) = modified_by {
            if size < spec.min_lot - MONEY_EPSILON {
                warn!(rule = ?rule, size, min_lot = spec.min_lot, "⛔ Compliance: downsized below minimum lot");
                return Assessment::rejected(
                    ComplianceRejection::BelowMinimumAfterDownsize { rule, size, min_lot: spec.min_lot },
                    mode,
                );
            }
        }

        // [5] Consistency (advisory)
        let mut advisories = Vec::new();
        let potential = size * loss_per_lot * mode.reward_multiple();
        if let Some(report) =
            consistency.projected_breach(today, potential, limits.consistency_rule_fraction)
        {
            info!(
                instrument = %order.signal.instrument,
                ratio      = report.ratio,
                limit      = limits.consistency_rule_fraction,
                "⚠️ Consistency advisory: today would dominate the window"
            );
            advisories.push(Advisory::Consistency {
                projected_day_profit: report.best_day_profit,
                window_profit:        report.total_profit,
                ratio:                report.ratio,
                limit:                limits.consistency_rule_fraction,
            });
        }

        let decision = match modified_by {
            Some(rule) => ComplianceDecision::Modified {
                size,
                risk_fraction: size * loss_per_lot / equity,
                rule,
            },
            None => ComplianceDecision::Approved,
        };

        info!(
            instrument = %order.signal.instrument,
            decision   = ?decision,
            mode       = ?mode,
            "✅ Compliance passed"
        );

        Assessment { decision, advisories, mode }
    }
}
