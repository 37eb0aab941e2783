//! Scripted in-memory adapter for engine tests.
//!
//! One instance plays one venue. Tests script top-of-book, funding and
//! failure behavior, then assert against the recorded order flow.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::traits::{Exchange, Venue};
use super::types::{
    ExchangeBalance, OrderBook, OrderRequest, OrderResponse, OrderStatus, SymbolInfo, Ticker,
};

pub struct MockExchange {
    venue: Venue,
    books: RwLock<HashMap<String, OrderBook>>,
    tickers: RwLock<HashMap<String, Ticker>>,
    funding_rates: RwLock<HashMap<String, Decimal>>,
    symbols: RwLock<Vec<SymbolInfo>>,
    balances: RwLock<Vec<ExchangeBalance>>,
    orders: RwLock<Vec<OrderRequest>>,
    fail_orders: AtomicBool,
    order_id_counter: AtomicU64,
}

impl MockExchange {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            books: RwLock::new(HashMap::new()),
            tickers: RwLock::new(HashMap::new()),
            funding_rates: RwLock::new(HashMap::new()),
            symbols: RwLock::new(Vec::new()),
            balances: RwLock::new(vec![ExchangeBalance {
                currency: "KRW".to_string(),
                free: Decimal::new(10_000_000, 0),
                used: Decimal::ZERO,
                total: Decimal::new(10_000_000, 0),
            }]),
            orders: RwLock::new(Vec::new()),
            fail_orders: AtomicBool::new(false),
            order_id_counter: AtomicU64::new(1),
        }
    }

    /// Script a one-level book.
    pub async fn set_book(
        &self,
        symbol: &str,
        bid: Decimal,
        bid_size: Decimal,
        ask: Decimal,
        ask_size: Decimal,
    ) {
        self.books.write().await.insert(
            symbol.to_string(),
            OrderBook {
                bids: vec![(bid, bid_size)],
                asks: vec![(ask, ask_size)],
                timestamp: Utc::now(),
            },
        );
    }

    pub async fn clear_book(&self, symbol: &str) {
        self.books.write().await.remove(symbol);
    }

    /// Script the last-trade price (the fx refresh reads this for "USDT").
    pub async fn set_last_price(&self, symbol: &str, last: Decimal) {
        self.tickers.write().await.insert(
            symbol.to_string(),
            Ticker {
                last,
                bid: last,
                ask: last,
                volume: Decimal::ZERO,
                timestamp: Utc::now(),
            },
        );
    }

    pub async fn set_funding_rate(&self, symbol: &str, rate: Decimal) {
        self.funding_rates
            .write()
            .await
            .insert(symbol.to_string(), rate);
    }

    pub async fn set_symbols(&self, symbols: Vec<SymbolInfo>) {
        *self.symbols.write().await = symbols;
    }

    pub async fn set_balances(&self, balances: Vec<ExchangeBalance>) {
        *self.balances.write().await = balances;
    }

    /// Make every subsequent order placement return `None`.
    pub fn set_fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    /// Every order this venue has accepted, in placement order.
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.orders.read().await.clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn get_order_book(&self, symbol: &str, _depth: u32) -> Option<OrderBook> {
        self.books.read().await.get(symbol).cloned()
    }

    async fn get_ticker(&self, symbol: &str) -> Option<Ticker> {
        self.tickers.read().await.get(symbol).cloned()
    }

    async fn get_funding_rate(&self, symbol: &str) -> Option<Decimal> {
        self.funding_rates.read().await.get(symbol).copied()
    }

    async fn place_order(&self, request: &OrderRequest) -> Option<OrderResponse> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return None;
        }

        self.orders.write().await.push(request.clone());

        let fill_price = self
            .books
            .read()
            .await
            .get(&request.symbol)
            .and_then(|b| match request.side {
                super::types::OrderSide::Buy => b.best_ask(),
                super::types::OrderSide::Sell => b.best_bid(),
            })
            .map(|(price, _)| price)
            .unwrap_or(Decimal::ZERO);

        let id = self.order_id_counter.fetch_add(1, Ordering::SeqCst);
        Some(OrderResponse {
            order_id: id.to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            size: request.size,
            executed_size: request.size,
            price: fill_price,
            status: OrderStatus::Filled,
            timestamp: Utc::now(),
            fee: Decimal::ZERO,
        })
    }

    async fn get_balances(&self) -> Vec<ExchangeBalance> {
        self.balances.read().await.clone()
    }

    async fn get_symbols(&self) -> Vec<SymbolInfo> {
        self.symbols.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::OrderSide;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_scripted_book_and_orders() {
        let mock = MockExchange::new(Venue::Okx);
        mock.set_book("BTC", dec!(100), dec!(5), dec!(101), dec!(5))
            .await;

        let book = mock.get_order_book("BTC", 1).await.unwrap();
        assert_eq!(book.best_bid().unwrap().0, dec!(100));

        let request = OrderRequest::market("BTC", OrderSide::Sell, dec!(0.5));
        let response = mock.place_order(&request).await.unwrap();
        assert_eq!(response.status, OrderStatus::Filled);
        assert_eq!(response.price, dec!(100)); // sell hits the bid
        assert_eq!(mock.placed_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_orders_returns_none_and_records_nothing() {
        let mock = MockExchange::new(Venue::Okx);
        mock.set_fail_orders(true);
        let request = OrderRequest::market("BTC", OrderSide::Sell, dec!(1));
        assert!(mock.place_order(&request).await.is_none());
        assert!(mock.placed_orders().await.is_empty());
    }
}
