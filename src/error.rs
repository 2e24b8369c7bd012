//! # error
//!
//! Error taxonomy of the pipeline plus the HTTP-facing [`AppError`].
//!
//! | Category              | Type                    | Policy                              |
//! |-----------------------|-------------------------|-------------------------------------|
//! | `DataOrderingError`   | [`DataError`]           | drop bar + log, no retry            |
//! | `ValidationRejection` | [`ValidationRejection`] | drop candidate, no retry            |
//! | `ComplianceRejection` | [`ComplianceRejection`] | drop (or downsize upstream)         |
//! | `ConfigurationError`  | [`ConfigError`]         | fatal at startup                    |
//! | `ExecutionFailure`    | [`ExecutionFailure`]    | terminal for the candidate          |
//!
//! Every handler returns `Result<_, AppError>`; axum's `IntoResponse` impl
//! turns it into a structured JSON body so the feeding EA always gets a
//! machine-readable answer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::models::Timeframe;
use crate::risk::ComplianceRule;

// ─── Data ordering ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("{instrument} {timeframe}: bar at {received} is not after {last}")]
    OutOfOrder {
        instrument: String,
        timeframe:  Timeframe,
        last:       DateTime<Utc>,
        received:   DateTime<Utc>,
    },

    #[error("{instrument} {timeframe}: malformed bar at {at}: {reason}")]
    Malformed {
        instrument: String,
        timeframe:  Timeframe,
        at:         DateTime<Utc>,
        reason:     &'static str,
    },
}

// ─── Validation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationRejection {
    #[error("volatility {units:.2} units outside band [{min}, {max}]")]
    VolatilityOutOfRange { units: f64, min: f64, max: f64 },

    #[error("no volatility measure available for {instrument}")]
    VolatilityUnavailable { instrument: String },

    #[error("size {size} below minimum lot {min_lot}")]
    SizeBelowMinimum { size: f64, min_lot: f64 },

    #[error("equity {equity} is not positive")]
    NonPositiveEquity { equity: f64 },
}

// ─── Compliance ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComplianceRejection {
    #[error("daily loss limit: realized {realized:.2} minus projected {projected_loss:.2} breaches -{limit:.2}")]
    DailyLossLimit { realized: f64, projected_loss: f64, limit: f64 },

    #[error("max drawdown: drawdown {drawdown:.2} plus projected {projected_loss:.2} exceeds {limit:.2}")]
    MaxDrawdown { drawdown: f64, projected_loss: f64, limit: f64 },

    #[error("concurrent positions: {open} open, max {max}")]
    MaxConcurrentPositions { open: usize, max: usize },

    #[error("open risk {open_risk:.2} leaves no room under cap {cap:.2}")]
    OpenRiskExhausted { open_risk: f64, cap: f64 },

    #[error("{rule:?} would need size {size}, below minimum lot {min_lot}")]
    BelowMinimumAfterDownsize { rule: ComplianceRule, size: f64, min_lot: f64 },

    #[error("equity {equity} is not positive")]
    NonPositiveEquity { equity: f64 },
}

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{key}='{value}' is invalid: {reason}")]
    Invalid { key: String, value: String, reason: String },

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),

    #[error("invalid instrument unit for {instrument}: {reason}")]
    InvalidInstrumentUnit { instrument: String, reason: String },

    #[error("instrument table: {reason}")]
    Instruments { reason: String },
}

// ─── Execution ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionFailure {
    #[error("execution bridge unreachable: {0}")]
    Unreachable(String),

    #[error("execution bridge HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("order rejected: retcode={retcode} comment={comment}")]
    Rejected { retcode: u32, comment: String },

    #[error("order not filled: {0}")]
    NotFilled(String),

    #[error("fill at {fill} is on the wrong side of stop {stop}")]
    FillBeyondStop { fill: f64, stop: f64 },

    #[error("reservation {0} is unknown")]
    UnknownReservation(uuid::Uuid),
}

// ─── Persistence ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("unsupported state version {0}")]
    Version(u32),
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    DataOrdering(#[from] DataError),

    #[error(transparent)]
    Validation(#[from] ValidationRejection),

    #[error(transparent)]
    Compliance(#[from] ComplianceRejection),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
}

impl PipelineError {
    /// Short category label used in journal events.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::DataOrdering(_)  => "DATA_ORDERING",
            PipelineError::Validation(_)    => "VALIDATION",
            PipelineError::Compliance(_)    => "COMPLIANCE",
            PipelineError::Configuration(_) => "CONFIGURATION",
            PipelineError::Execution(_)     => "EXECUTION",
        }
    }
}

// ─── HTTP ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    /// The request payload was syntactically correct but semantically invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No pipeline is running for the requested instrument.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The pipeline's inbox is closed or full.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg)  => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg)    => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Pipeline(err)    => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            AppError::Internal(err)    => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {err}"),
            ),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
