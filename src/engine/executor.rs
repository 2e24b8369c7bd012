//! # engine::executor
//!
//! **Execution Gateway**: hands an approved [`OrderRequest`] to the broker
//! side and returns a [`FillConfirmation`] or an [`ExecutionFailure`].
//!
//! ## MT5 EA API Contract (MQL5 side)
//! The EA accepts POST `/order/send` and answers with JSON:
//! ```json
//! { "retcode": 10009, "order": 123456, "price": 1.10012, "comment": "Request completed" }
//! ```
//! retcode 10009 = `TRADE_RETCODE_DONE` (success). `price` is the fill price;
//! when the EA omits it the requested entry is assumed.
//!
//! Rejection is terminal for the order: nothing here retries.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::ExecutionFailure;
use crate::models::{FillConfirmation, OrderRequest};

/// `TRADE_RETCODE_DONE`
pub const RETCODE_DONE: u32 = 10009;
/// `TRADE_RETCODE_REJECT`
pub const RETCODE_REJECT: u32 = 10006;

const MAGIC: u64 = 420001;

pub trait ExecutionGateway: Send + Sync {
    fn submit(
        &self,
        order: &OrderRequest,
    ) -> impl Future<Output = Result<FillConfirmation, ExecutionFailure>> + Send;
}

// ─── MT5 Request / Response ───────────────────────────────────────────────────

/// Payload sent to the MT5 EA endpoint
#[derive(Debug, serde::Serialize)]
pub struct Mt5OrderRequest {
    pub symbol:  String,
    pub action:  &'static str,  // "BUY" | "SELL"
    pub volume:  f64,
    pub price:   f64,
    pub sl:      f64,
    pub tp:      f64,
    pub comment: String,
    pub magic:   u64,
}

impl Mt5OrderRequest {
    pub fn from_order(order: &OrderRequest) -> Self {
        let id = order.order_id.simple().to_string();
        Self {
            symbol:  order.instrument.clone(),
            action:  order.direction.action(),
            volume:  order.size,
            price:   order.entry_price,
            sl:      order.stop_loss,
            tp:      order.take_profit,
            comment: format!("XPWS-{}", id.get(..8).unwrap_or(&id)),
            magic:   MAGIC,
        }
    }
}

/// Response from the MT5 EA
#[derive(Debug, serde::Deserialize)]
pub struct Mt5OrderResponse {
    pub retcode: u32,
    /// Ticket, present when retcode = 10009
    pub order:   Option<u64>,
    pub price:   Option<f64>,
    pub comment: Option<String>,
}

// ─── MT5 bridge ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Mt5Bridge {
    client:   reqwest::Client,
    base_url: String,
    timeout:  Duration,
}

impl Mt5Bridge {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn fire(&self, order: &OrderRequest) -> Result<FillConfirmation, ExecutionFailure> {
        let payload = Mt5OrderRequest::from_order(order);
        let url = format!("{}/order/send", self.base_url);

        info!(
            symbol  = %payload.symbol,
            action  = %payload.action,
            volume  = payload.volume,
            price   = payload.price,
            sl      = payload.sl,
            tp      = payload.tp,
            mt5_url = %url,
            "🚀 [EXECUTOR] Sending order to MT5"
        );

        // ── HTTP POST ─────────────────────────────────────────────────────────
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "MT5 unreachable");
                ExecutionFailure::Unreachable(e.to_string())
            })?;

        // ── HTTP Status ───────────────────────────────────────────────────────
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(http_status = %status, body = %body, "MT5 returned HTTP error");
            return Err(ExecutionFailure::Http { status: status.as_u16(), body });
        }

        // ── Parse Response ────────────────────────────────────────────────────
        let resp: Mt5OrderResponse = response.json().await.map_err(|e| {
            error!(error = %e, "MT5 response parse failed");
            ExecutionFailure::Unreachable(format!("MT5 response parse error: {e}"))
        })?;

        // ── Check retcode ─────────────────────────────────────────────────────
        if resp.retcode != RETCODE_DONE {
            let comment = resp.comment.unwrap_or_else(|| "unknown".to_string());
            warn!(retcode = resp.retcode, %comment, "MT5 rejected order");
            return Err(ExecutionFailure::Rejected { retcode: resp.retcode, comment });
        }

        let fill = FillConfirmation {
            filled:             true,
            actual_entry_price: resp.price.filter(|p| p.is_finite() && *p > 0.0).unwrap_or(order.entry_price),
            ticket_id:          resp.order,
        };
        info!(ticket = ?fill.ticket_id, price = fill.actual_entry_price, "✅ [EXECUTOR] MT5 accepted order");
        Ok(fill)
    }
}

impl ExecutionGateway for Mt5Bridge {
    async fn submit(&self, order: &OrderRequest) -> Result<FillConfirmation, ExecutionFailure> {
        self.fire(order).await
    }
}

// ─── Mock bridge ──────────────────────────────────────────────────────────────

/// In-process bridge: fills every order at its requested price, or rejects
/// every order when built with [`MockBridge::rejecting`].
#[derive(Debug, Default)]
pub struct MockBridge {
    next_ticket: AtomicU64,
    reject_with: Option<String>,
    submitted:   AtomicU64,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(reason: &str) -> Self {
        Self { reject_with: Some(reason.to_string()), ..Self::default() }
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl ExecutionGateway for MockBridge {
    async fn submit(&self, order: &OrderRequest) -> Result<FillConfirmation, ExecutionFailure> {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if let Some(reason) = &self.reject_with {
            info!(symbol = %order.instrument, "🎭 [EXECUTOR] MOCK rejecting order");
            return Err(ExecutionFailure::Rejected { retcode: RETCODE_REJECT, comment: reason.clone() });
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        info!(symbol = %order.instrument, ticket, "🎭 [EXECUTOR] MOCK fill");
        Ok(FillConfirmation {
            filled:             true,
            actual_entry_price: order.entry_price,
            ticket_id:          Some(ticket),
        })
    }
}

// ─── Gateway ──────────────────────────────────────────────────────────────────

/// Gateway selected at startup from `MT5_BASE_URL`.
#[derive(Debug)]
pub enum Gateway {
    Mt5(Mt5Bridge),
    Mock(MockBridge),
}

impl Gateway {
    pub fn from_url(base_url: &str, client: reqwest::Client, timeout: Duration) -> Self {
        if base_url == "mock" {
            info!("🎭 [EXECUTOR] Running in MOCK mode — simulating MT5 fills");
            Gateway::Mock(MockBridge::new())
        } else {
            Gateway::Mt5(Mt5Bridge::new(client, base_url, timeout))
        }
    }
}

impl ExecutionGateway for Gateway {
    async fn submit(&self, order: &OrderRequest) -> Result<FillConfirmation, ExecutionFailure> {
        match self {
            Gateway::Mt5(bridge)  => bridge.submit(order).await,
            Gateway::Mock(bridge) => bridge.submit(order).await,
        }
    }
}
