//! Exchange adapters and the routing registry.
//!
//! Four live venues (Upbit/Bithumb KRW spot, OKX/Gate USDT perpetuals) plus
//! a scripted mock for tests. The engine only ever sees the [`Exchange`]
//! trait through the [`ExchangeRegistry`].

mod bithumb;
mod gate;
mod http;
pub mod mock;
mod okx;
mod registry;
mod sign;
mod traits;
mod types;
mod upbit;

pub use bithumb::BithumbExchange;
pub use gate::GateExchange;
pub use http::{RestDispatcher, RetryPolicy};
pub use mock::MockExchange;
pub use okx::OkxExchange;
pub use registry::{build_registry, ExchangeRegistry};
pub use traits::{Exchange, MarketSide, Venue};
pub use types::*;
pub use upbit::UpbitExchange;
