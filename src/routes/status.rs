//! # routes::status

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use crate::state::SharedState;

/// GET /api/health: liveness check
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let mut instruments: Vec<&str> = state.feeds.instruments().collect();
    instruments.sort_unstable();

    Json(json!({
        "ok":          true,
        "service":     "xpws-engine",
        "version":     env!("CARGO_PKG_VERSION"),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "instruments": instruments,
    }))
}

/// GET /api/status: account, weekly book, consistency and limits
pub async fn get_status(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshot = state.desk.snapshot(Utc::now()).await;
    Json(json!({
        "ok":     true,
        "status": snapshot,
    }))
}
