//! Strategy engine: premium measurement, position state and the
//! split-entry execution loop.

mod executor;
mod position;
mod premium;

pub use executor::SplitEngine;
pub use position::{Position, PositionBook, PositionStatus, PositionSummary, SliceEntry};
pub use premium::{PremiumEngine, PremiumQuote, RateCalculator, FALLBACK_USDT_KRW};
