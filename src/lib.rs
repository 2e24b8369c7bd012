//! # XPWS engine
//!
//! Decision and compliance pipeline that turns a multi-timeframe structure
//! signal into a sized, gated and lifecycle-managed order.
//!
//! ```text
//!  PriceBar ─▶ StructureSignalDetector ─▶ EntryTriggerCalculator ─▶ VolatilityPositionSizer
//!                                                                        │
//!        ┌──────────────────── WeeklyPerformanceTracker ◀──────┐         ▼
//!        │ (current mode)                                     │   ComplianceGate ─▶ ExecutionGateway
//!        ▼                                                    │                           │
//!  PositionLifecycleManager ─────── ClosedTrade ──────────────┘◀──────── fill ───────────┘
//! ```
//!
//! Everything under [`engine`], [`risk`] and [`models`] is usable without any
//! I/O; [`state::Desk`] is the single writer of the shared account state and
//! [`engine::pipeline`] runs one task per instrument.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod risk;
pub mod routes;
pub mod state;
pub mod store;
