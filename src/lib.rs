//! Kimchi premium split-entry arbitrage executor.
//!
//! Watches the premium between Korean KRW spot markets (Upbit, Bithumb)
//! and foreign USDT perpetual markets (OKX, Gate). When a coin trades at a
//! reverse premium domestically, the engine buys spot in KRW and shorts
//! the same notional on a perpetual, in fixed-size slices, then unwinds
//! the pair slice by slice once the premium normalizes. The delta stays
//! flat; the premium swing is the product.

pub mod config;
pub mod engine;
pub mod exchange;
pub mod utils;

pub use config::Config;
