//! # XPWS engine: service binary
//!
//! ```text
//!  ┌─────────────┐  POST /api/feed/bar          ┌──────────────────────────────┐
//!  │  MT5 EA     │ ───────────────────────────▶ │ FeedRouter                   │
//!  │  (feeds)    │  POST /api/feed/volatility   │ ├─ EURUSD pipeline task      │
//!  └─────────────┘  POST /api/account/snapshot  │ ├─ XAUUSD pipeline task      │
//!        ▲                                      │ └─ ...                       │
//!        │                                      │            │                 │
//!        │   POST /order/send                   │   Desk (RwLock<Ledger>) 🛡️   │
//!        └───────────────────────────────────── │   Journal ──▶ log            │
//!                                               └──────────────────────────────┘
//! ```
//!
//! ## Environment Variables
//!
//! | Variable         | Default                 | Description                     |
//! |------------------|-------------------------|---------------------------------|
//! | `BIND_ADDR`      | `0.0.0.0:3000`          | Address Axum listens on         |
//! | `MT5_BASE_URL`   | `http://localhost:8081` | MT5 EA adapter, or `mock`       |
//! | `STATE_FILE`     | `data/xpws-state.json`  | Persisted account + weekly book |
//! | `INITIAL_EQUITY` | `100000`                | Equity of a fresh ledger        |
//! | `RUST_LOG`       | `xpws_engine=debug`     | Tracing filter                  |
//!
//! Pipeline keys are listed in [`xpws_engine::config`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xpws_engine::{
    config::{PipelineConfig, ServiceConfig},
    engine::{spawn_pipelines, supervise, Gateway},
    events::{log_events, Journal},
    risk::ComplianceGate,
    routes,
    state::{AppState, Desk, Ledger},
    store::{JsonFileStore, StateStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("xpws_engine=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║            XPWS — Decision & Compliance Engine        ║
  ║  Structure · Trigger · Sizing · Gate · Lifecycle      ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Configuration (fatal on error) ─────────────────────────────────────
    let config   = PipelineConfig::from_env().context("pipeline configuration")?;
    let service  = ServiceConfig::from_env().context("service configuration")?;
    let registry = Arc::new(config.registry().context("instrument table")?);
    let clock    = config.clock();

    // ── 4. Ledger: restore or start fresh ─────────────────────────────────────
    let store = Arc::new(JsonFileStore::new(&service.state_file));
    let ledger = match store.load().context("loading saved state")? {
        Some(saved) => Ledger::restore(
            saved,
            clock,
            config.weekly_profit_activation_threshold,
            config.consistency_window_days,
        ),
        None => {
            info!(equity = service.initial_equity, "No saved state — starting a fresh ledger");
            Ledger::fresh(
                service.initial_equity,
                Utc::now(),
                clock,
                config.weekly_profit_activation_threshold,
                config.consistency_window_days,
            )
        }
    };

    // ── 5. Desk + journal ─────────────────────────────────────────────────────
    let journal = Journal::default();
    tokio::spawn(log_events(journal.subscribe()));

    let desk = Arc::new(Desk::new(
        ledger,
        ComplianceGate::new(config.gate_limits()),
        clock,
        Arc::clone(&registry),
        journal,
    ));

    // ── 6. Execution gateway + pipelines ──────────────────────────────────────
    let gateway = Arc::new(Gateway::from_url(
        &service.mt5_base_url,
        reqwest::Client::new(),
        Duration::from_secs(service.mt5_timeout_secs),
    ));
    let (feeds, pipelines) = spawn_pipelines(
        &config,
        Arc::clone(&registry),
        Arc::clone(&desk),
        gateway,
        service.feed_capacity,
    )
    .context("starting pipelines")?;
    let supervisor = tokio::spawn(supervise(pipelines));

    // ── 7. Periodic save ──────────────────────────────────────────────────────
    {
        let desk  = Arc::clone(&desk);
        let store = Arc::clone(&store);
        let every = Duration::from_secs(service.save_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = desk.persisted(Utc::now()).await;
                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Periodic state save failed"),
                    Err(e) => error!(error = %e, "State save task panicked"),
                }
            }
        });
    }

    // ── 8. CORS ───────────────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // ── 9. Router ─────────────────────────────────────────────────────────────
    let app = routes::router(Arc::new(AppState::new(Arc::clone(&desk), feeds)))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // ── 10. Bind & Serve ──────────────────────────────────────────────────────
    let addr: SocketAddr = service.bind_addr.parse().context("BIND_ADDR")?;
    info!(?addr, mt5 = %service.mt5_base_url, "🚀 XPWS engine starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    // ── 11. Drain pipelines ───────────────────────────────────────────────────
    // the router went down with the server, so every feed channel is closed
    match tokio::time::timeout(Duration::from_secs(10), supervisor).await {
        Ok(Ok(failed)) if failed.is_empty() => info!("All pipelines drained"),
        Ok(Ok(failed)) => error!(?failed, "Pipelines ended abnormally"),
        Ok(Err(e)) => error!(error = %e, "Pipeline supervisor panicked"),
        Err(_) => warn!("Pipelines still busy after 10s — saving anyway"),
    }

    // ── 12. Final save ────────────────────────────────────────────────────────
    store
        .save(&desk.persisted(Utc::now()).await)
        .context("saving state on shutdown")?;
    info!(path = %store.path().display(), "💾 State saved — bye");

    Ok(())
}
