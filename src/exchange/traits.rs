//! Venue identifiers and the adapter capability contract.
//!
//! The engine depends only on the [`Exchange`] trait, never on a concrete
//! venue type, so test doubles and new venues plug in without touching
//! engine logic.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::{ExchangeBalance, OrderBook, OrderRequest, OrderResponse, SymbolInfo, Ticker};

/// Which leg of the trade a venue serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSide {
    /// KRW spot market (the buy leg).
    Domestic,
    /// USDT perpetual futures market (the short leg).
    Foreign,
}

/// Venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Upbit,
    Bithumb,
    Okx,
    Gate,
}

impl Venue {
    pub fn market_side(&self) -> MarketSide {
        match self {
            Venue::Upbit | Venue::Bithumb => MarketSide::Domestic,
            Venue::Okx | Venue::Gate => MarketSide::Foreign,
        }
    }

    pub fn is_domestic(&self) -> bool {
        self.market_side() == MarketSide::Domestic
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Venue::Upbit => "upbit",
            Venue::Bithumb => "bithumb",
            Venue::Okx => "okx",
            Venue::Gate => "gate",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upbit" => Ok(Venue::Upbit),
            "bithumb" => Ok(Venue::Bithumb),
            "okx" => Ok(Venue::Okx),
            "gate" => Ok(Venue::Gate),
            other => anyhow::bail!("unknown venue name: {other}"),
        }
    }
}

/// Uniform capability surface over heterogeneous exchange APIs.
///
/// Every method is a suspension point bounded by the shared HTTP timeout.
/// Recoverable failures (network error, 4xx/5xx, malformed body) come back
/// as `None`/empty so the caller treats absence uniformly; adapters log the
/// underlying cause before swallowing it.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Returns the venue identifier.
    fn venue(&self) -> Venue;

    /// Top-of-book snapshot for a symbol.
    async fn get_order_book(&self, symbol: &str, depth: u32) -> Option<OrderBook>;

    /// Last-trade ticker for a symbol.
    async fn get_ticker(&self, symbol: &str) -> Option<Ticker>;

    /// Current funding rate for a perpetual contract. Domestic venues have
    /// no funding and return `None`.
    async fn get_funding_rate(&self, symbol: &str) -> Option<Decimal>;

    /// Place an order; `None` means the venue rejected it or the call failed.
    async fn place_order(&self, request: &OrderRequest) -> Option<OrderResponse>;

    /// Account balances keyed by currency.
    async fn get_balances(&self) -> Vec<ExchangeBalance>;

    /// Tradable symbols with their size rules.
    async fn get_symbols(&self) -> Vec<SymbolInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_round_trips_through_str() {
        for venue in [Venue::Upbit, Venue::Bithumb, Venue::Okx, Venue::Gate] {
            assert_eq!(venue.to_string().parse::<Venue>().unwrap(), venue);
        }
    }

    #[test]
    fn test_unknown_venue_is_an_error() {
        assert!("binance".parse::<Venue>().is_err());
    }

    #[test]
    fn test_market_sides() {
        assert!(Venue::Upbit.is_domestic());
        assert!(Venue::Bithumb.is_domestic());
        assert_eq!(Venue::Okx.market_side(), MarketSide::Foreign);
        assert_eq!(Venue::Gate.market_side(), MarketSide::Foreign);
    }
}
