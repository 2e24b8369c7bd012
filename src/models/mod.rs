//! Domain models shared across the pipeline.

pub mod account;
pub mod bar;
pub mod instrument;
pub mod period;
pub mod position;
pub mod signal;

pub use account::{AccountState, DailyLedger, Reservation};
pub use bar::{PriceBar, Timeframe};
pub use instrument::{InstrumentClass, InstrumentRegistry, InstrumentSpec};
pub use period::{DayId, PeriodClock, WeekId};
pub use position::{ClosedTrade, CloseReason, Position, PositionMode, PositionPhase};
pub use signal::{
    CandidateSignal, Direction, FillConfirmation, OrderRequest, RetestSignal, SizedOrder,
};
