//! HTTP ingress for the feeding EA and status readers.

pub mod feed;
pub mod status;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        // ── Feeds ─────────────────────────────────────────────────────────────
        .route("/api/feed/bar",         post(feed::push_bar))
        .route("/api/feed/volatility",  post(feed::push_volatility))
        .route("/api/account/snapshot", post(feed::push_account_snapshot))
        // ── Status ────────────────────────────────────────────────────────────
        .route("/api/status",           get(status::get_status))
        .route("/api/health",           get(status::health_check))
        .with_state(state)
}
