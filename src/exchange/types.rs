//! Venue-agnostic market data and order types.
//!
//! Every adapter normalizes its native API shapes into these structs so the
//! engine never touches venue-specific payloads. All monetary fields are
//! `rust_decimal::Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One price level: `[price, size]`.
pub type BookLevel = (Decimal, Decimal);

/// Order book snapshot (top levels only; this system never needs depth
/// beyond the best few quotes).
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// Best bid price and size, if the book has one.
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    /// Best ask price and size, if the book has one.
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }
}

/// Last-trade ticker.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that reverses this one's exposure.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
}

/// A new order, created and consumed within one entry/exit attempt.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    /// Spend-this-much semantics for KRW market buys: Upbit and Bithumb take
    /// a total KRW amount instead of a coin quantity on the buy side.
    pub total_krw: Option<Decimal>,
}

impl OrderRequest {
    /// Market order for a coin quantity.
    pub fn market(symbol: &str, side: OrderSide, size: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            size,
            order_type: OrderType::Market,
            price: None,
            total_krw: None,
        }
    }

    /// Market buy specified by total KRW spend (domestic venues).
    pub fn market_buy_krw(symbol: &str, size: Decimal, total_krw: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            size,
            order_type: OrderType::Market,
            price: None,
            total_krw: Some(total_krw),
        }
    }
}

/// Order acknowledgement from a venue.
#[derive(Debug, Clone)]
pub struct OrderResponse {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub executed_size: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub fee: Decimal,
}

/// Account balance for one currency. Read-only snapshot, never cached by
/// the engine.
#[derive(Debug, Clone)]
pub struct ExchangeBalance {
    pub currency: String,
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

/// Per-venue trading rules for a symbol.
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    /// Base asset, normalized for cross-venue matching (e.g. "BTC").
    pub symbol: String,
    /// Fractional digits allowed in order sizes.
    pub size_precision: u32,
    /// Smallest order size the venue accepts.
    pub min_size: Decimal,
    /// Smallest order notional the venue accepts, in the venue's quote
    /// currency (KRW domestic, USDT foreign).
    pub min_notional: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_best_quotes_on_empty_book() {
        let book = OrderBook {
            bids: vec![],
            asks: vec![(dec!(100), dec!(1))],
            timestamp: Utc::now(),
        };
        assert!(book.best_bid().is_none());
        assert_eq!(book.best_ask(), Some((dec!(100), dec!(1))));
    }

    #[test]
    fn test_market_buy_krw_carries_spend() {
        let req = OrderRequest::market_buy_krw("BTC", dec!(0.0001), dec!(10000));
        assert_eq!(req.total_krw, Some(dec!(10000)));
        assert_eq!(req.side, OrderSide::Buy);
        assert_eq!(req.order_type, OrderType::Market);
    }
}
