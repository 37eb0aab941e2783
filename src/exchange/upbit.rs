//! Upbit KRW spot adapter.
//!
//! Authenticated calls carry a JWT (HS256) with a SHA512 hash of the query
//! string, per Upbit's API conventions. Market buys are placed by total KRW
//! spend (`ord_type=price`), market sells by coin quantity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::http::RestDispatcher;
use super::sign::jwt_hs256;
use super::traits::{Exchange, Venue};
use super::types::{
    ExchangeBalance, OrderBook, OrderRequest, OrderResponse, OrderSide, OrderStatus, SymbolInfo,
    Ticker,
};
use crate::config::VenueCredentials;

const BASE_URL: &str = "https://api.upbit.com";

pub struct UpbitExchange {
    dispatcher: RestDispatcher,
    access_key: String,
    secret_key: String,
    base_url: String,
    nonce_counter: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct UpbitOrderBook {
    timestamp: i64,
    orderbook_units: Vec<UpbitBookUnit>,
}

#[derive(Debug, Deserialize)]
struct UpbitBookUnit {
    ask_price: Decimal,
    bid_price: Decimal,
    ask_size: Decimal,
    bid_size: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpbitTicker {
    trade_price: Decimal,
    acc_trade_volume_24h: Decimal,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct UpbitMarket {
    market: String,
}

#[derive(Debug, Deserialize)]
struct UpbitAccount {
    currency: String,
    #[serde(with = "rust_decimal::serde::str")]
    balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpbitOrderAck {
    uuid: String,
    state: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    executed_volume: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    paid_fee: Option<Decimal>,
}

impl UpbitExchange {
    pub fn new(credentials: &VenueCredentials, requests_per_second: u32) -> anyhow::Result<Self> {
        Ok(Self {
            dispatcher: RestDispatcher::new(requests_per_second)?,
            access_key: credentials.api_key.clone(),
            secret_key: credentials.secret_key.clone(),
            base_url: BASE_URL.to_string(),
            nonce_counter: AtomicU64::new(1),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Upbit market code for a base asset, e.g. "KRW-BTC".
    fn market(symbol: &str) -> String {
        format!("KRW-{symbol}")
    }

    fn nonce(&self) -> String {
        format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            self.nonce_counter.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn auth_header(&self, query: Option<&str>) -> String {
        let token = jwt_hs256(&self.access_key, &self.secret_key, &self.nonce(), query);
        format!("Bearer {token}")
    }

    fn parse_status(state: &str) -> OrderStatus {
        match state {
            "done" => OrderStatus::Filled,
            "cancel" => OrderStatus::Cancelled,
            _ => OrderStatus::Pending,
        }
    }

    async fn fetch_order_book(&self, symbol: &str) -> anyhow::Result<OrderBook> {
        let url = format!("{}/v1/orderbook", self.base_url);
        let market = Self::market(symbol);
        let books: Vec<UpbitOrderBook> = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .query(&[("markets", market.as_str())])
            })
            .await?;

        let book = books
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty orderbook response"))?;

        Ok(OrderBook {
            bids: book
                .orderbook_units
                .iter()
                .map(|u| (u.bid_price, u.bid_size))
                .collect(),
            asks: book
                .orderbook_units
                .iter()
                .map(|u| (u.ask_price, u.ask_size))
                .collect(),
            timestamp: DateTime::from_timestamp_millis(book.timestamp).unwrap_or_else(Utc::now),
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> anyhow::Result<Ticker> {
        let url = format!("{}/v1/ticker", self.base_url);
        let market = Self::market(symbol);
        let tickers: Vec<UpbitTicker> = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .query(&[("markets", market.as_str())])
            })
            .await?;

        let t = tickers
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty ticker response"))?;

        // Upbit's public ticker carries no quotes; callers needing bid/ask
        // use the orderbook. Last trade is what the fx refresh wants.
        Ok(Ticker {
            last: t.trade_price,
            bid: t.trade_price,
            ask: t.trade_price,
            volume: t.acc_trade_volume_24h,
            timestamp: DateTime::from_timestamp_millis(t.timestamp).unwrap_or_else(Utc::now),
        })
    }

    async fn submit_order(&self, request: &OrderRequest) -> anyhow::Result<OrderResponse> {
        let market = Self::market(&request.symbol);
        let params: Vec<(&str, String)> = match request.side {
            OrderSide::Buy => {
                let spend = request
                    .total_krw
                    .ok_or_else(|| anyhow::anyhow!("market buy requires total_krw"))?;
                vec![
                    ("market", market.clone()),
                    ("side", "bid".to_string()),
                    ("ord_type", "price".to_string()),
                    ("price", spend.trunc().to_string()),
                ]
            }
            OrderSide::Sell => vec![
                ("market", market.clone()),
                ("side", "ask".to_string()),
                ("ord_type", "market".to_string()),
                ("volume", request.size.to_string()),
            ],
        };

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}/v1/orders", self.base_url);

        let ack: UpbitOrderAck = self
            .dispatcher
            .send_once(
                self.dispatcher
                    .client()
                    .post(&url)
                    .header("Authorization", self.auth_header(Some(&query)))
                    .form(&params),
            )
            .await?;

        Ok(OrderResponse {
            order_id: ack.uuid,
            symbol: request.symbol.clone(),
            side: request.side,
            size: request.size,
            executed_size: ack.executed_volume.unwrap_or(Decimal::ZERO),
            price: ack.price.unwrap_or(Decimal::ZERO),
            status: Self::parse_status(&ack.state),
            timestamp: Utc::now(),
            fee: ack.paid_fee.unwrap_or(Decimal::ZERO),
        })
    }

    async fn fetch_balances(&self) -> anyhow::Result<Vec<ExchangeBalance>> {
        let url = format!("{}/v1/accounts", self.base_url);
        let accounts: Vec<UpbitAccount> = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .header("Authorization", self.auth_header(None))
            })
            .await?;

        Ok(accounts
            .into_iter()
            .map(|a| ExchangeBalance {
                currency: a.currency,
                free: a.balance,
                used: a.locked,
                total: a.balance + a.locked,
            })
            .collect())
    }

    async fn fetch_symbols(&self) -> anyhow::Result<Vec<SymbolInfo>> {
        let url = format!("{}/v1/market/all", self.base_url);
        let markets: Vec<UpbitMarket> = self
            .dispatcher
            .send(|| self.dispatcher.client().get(&url))
            .await?;

        Ok(markets
            .into_iter()
            .filter_map(|m| m.market.strip_prefix("KRW-").map(str::to_string))
            .map(|base| SymbolInfo {
                symbol: base,
                size_precision: 8,
                min_size: dec!(0.00000001),
                min_notional: dec!(5000), // 5,000 KRW venue minimum
            })
            .collect())
    }
}

#[async_trait]
impl Exchange for UpbitExchange {
    fn venue(&self) -> Venue {
        Venue::Upbit
    }

    async fn get_order_book(&self, symbol: &str, _depth: u32) -> Option<OrderBook> {
        self.fetch_order_book(symbol)
            .await
            .map_err(|e| warn!(venue = "upbit", %symbol, error = %e, "Orderbook fetch failed"))
            .ok()
    }

    async fn get_ticker(&self, symbol: &str) -> Option<Ticker> {
        self.fetch_ticker(symbol)
            .await
            .map_err(|e| warn!(venue = "upbit", %symbol, error = %e, "Ticker fetch failed"))
            .ok()
    }

    async fn get_funding_rate(&self, _symbol: &str) -> Option<Decimal> {
        None // spot venue, no funding
    }

    async fn place_order(&self, request: &OrderRequest) -> Option<OrderResponse> {
        self.submit_order(request)
            .await
            .map_err(|e| {
                warn!(venue = "upbit", symbol = %request.symbol, error = %e, "Order failed")
            })
            .ok()
    }

    async fn get_balances(&self) -> Vec<ExchangeBalance> {
        self.fetch_balances()
            .await
            .map_err(|e| warn!(venue = "upbit", error = %e, "Balance fetch failed"))
            .unwrap_or_default()
    }

    async fn get_symbols(&self) -> Vec<SymbolInfo> {
        self.fetch_symbols()
            .await
            .map_err(|e| warn!(venue = "upbit", error = %e, "Symbol fetch failed"))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VenueCredentials;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_credentials() -> VenueCredentials {
        VenueCredentials {
            api_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            passphrase: None,
        }
    }

    #[tokio::test]
    async fn test_orderbook_parses_top_of_book() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orderbook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "market": "KRW-BTC",
                "timestamp": 1700000000000i64,
                "orderbook_units": [
                    {"ask_price": 99000000.0, "bid_price": 98990000.0,
                     "ask_size": 0.5, "bid_size": 0.7}
                ]
            }])))
            .mount(&server)
            .await;

        let upbit = UpbitExchange::new(&test_credentials(), 100)
            .unwrap()
            .with_base_url(&server.uri());

        let book = upbit.get_order_book("BTC", 1).await.expect("book");
        assert_eq!(book.best_ask().unwrap().0, dec!(99000000));
        assert_eq!(book.best_bid().unwrap().1, dec!(0.7));
    }

    #[tokio::test]
    async fn test_server_error_becomes_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orderbook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let upbit = UpbitExchange::new(&test_credentials(), 100)
            .unwrap()
            .with_base_url(&server.uri());

        assert!(upbit.get_order_book("BTC", 1).await.is_none());
    }

    #[test]
    fn test_market_code_format() {
        assert_eq!(UpbitExchange::market("XRP"), "KRW-XRP");
    }
}
