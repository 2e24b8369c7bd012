//! Decision stages of the pipeline and the runtime that wires them.

pub mod atr;
pub mod executor;
pub mod lifecycle;
pub mod pipeline;
pub mod sizer;
pub mod structure;
pub mod trigger;
pub mod weekly;

pub use atr::AverageTrueRange;
pub use executor::{ExecutionGateway, Gateway, MockBridge, Mt5Bridge};
pub use lifecycle::{LifecycleTransition, PositionLifecycleManager, PositionUpdate, PriceObservation};
pub use pipeline::{spawn_pipelines, supervise, FeedRouter, InstrumentPipeline, MarketEvent, PipelineOutcome};
pub use sizer::VolatilityPositionSizer;
pub use structure::{StructureParams, StructureSignalDetector};
pub use trigger::EntryTriggerCalculator;
pub use weekly::{WeeklyBook, WeeklyPerformanceTracker, WeeklyProfitRecord};
