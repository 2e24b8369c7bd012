//! # routes::feed
//!
//! Inbound feeds pushed by the MT5 EA.
//!
//! | Method | Path                    | Description                                  |
//! |--------|-------------------------|----------------------------------------------|
//! | POST   | `/api/feed/bar`         | Closed bar; answers with the pipeline outcomes |
//! | POST   | `/api/feed/volatility`  | Volatility measure (native price units)      |
//! | POST   | `/api/account/snapshot` | Equity / balance from the broker            |

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    engine::MarketEvent,
    error::AppError,
    models::{PriceBar, Timeframe},
    state::SharedState,
};

#[derive(Debug, Deserialize)]
pub struct BarFeed {
    pub instrument: String,
    pub timeframe:  Timeframe,
    #[serde(flatten)]
    pub bar:        PriceBar,
}

#[derive(Debug, Deserialize)]
pub struct VolatilityFeed {
    pub instrument: String,
    pub value:      f64,
}

#[derive(Debug, Deserialize)]
pub struct AccountSnapshotFeed {
    pub equity:  f64,
    pub balance: f64,
    /// Broker time of the snapshot; defaults to now.
    pub at:      Option<DateTime<Utc>>,
}

// ─── POST /api/feed/bar ───────────────────────────────────────────────────────

pub async fn push_bar(
    State(state): State<SharedState>,
    Json(feed): Json<BarFeed>,
) -> Result<impl IntoResponse, AppError> {
    let outcomes = state
        .feeds
        .request(&feed.instrument, MarketEvent::Bar { timeframe: feed.timeframe, bar: feed.bar })
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "ok":         true,
            "instrument": feed.instrument,
            "timeframe":  feed.timeframe,
            "outcomes":   outcomes,
        })),
    ))
}

// ─── POST /api/feed/volatility ────────────────────────────────────────────────

pub async fn push_volatility(
    State(state): State<SharedState>,
    Json(feed): Json<VolatilityFeed>,
) -> Result<impl IntoResponse, AppError> {
    if !(feed.value.is_finite() && feed.value > 0.0) {
        return Err(AppError::BadRequest(format!(
            "volatility must be a positive number, got {}",
            feed.value
        )));
    }

    state.feeds.dispatch(&feed.instrument, MarketEvent::Volatility(feed.value)).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "ok":         true,
            "instrument": feed.instrument,
            "value":      feed.value,
        })),
    ))
}

// ─── POST /api/account/snapshot ───────────────────────────────────────────────

pub async fn push_account_snapshot(
    State(state): State<SharedState>,
    Json(feed): Json<AccountSnapshotFeed>,
) -> Result<impl IntoResponse, AppError> {
    if !feed.equity.is_finite() || !feed.balance.is_finite() {
        return Err(AppError::BadRequest("equity and balance must be finite".into()));
    }

    let at = feed.at.unwrap_or_else(Utc::now);
    state.desk.apply_snapshot(feed.equity, feed.balance, at).await;

    Ok(Json(json!({
        "ok":      true,
        "equity":  feed.equity,
        "balance": feed.balance,
    })))
}
