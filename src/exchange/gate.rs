//! Gate.io USDT perpetual-futures adapter.
//!
//! Signs with HMAC-SHA512 hex over the canonical
//! `method\npath\nquery\nsha512(body)\ntimestamp` string. Gate expresses
//! futures order sizes as signed contract counts (negative = short); market
//! orders are price "0" with IOC time-in-force.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::warn;

use super::http::RestDispatcher;
use super::sign::{hmac_sha512_hex, sha512_hex};
use super::traits::{Exchange, Venue};
use super::types::{
    ExchangeBalance, OrderBook, OrderRequest, OrderResponse, OrderSide, OrderStatus, SymbolInfo,
    Ticker,
};
use crate::config::VenueCredentials;

const BASE_URL: &str = "https://api.gateio.ws";

pub struct GateExchange {
    dispatcher: RestDispatcher,
    api_key: String,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GateBookLevel {
    #[serde(with = "rust_decimal::serde::str")]
    p: Decimal,
    s: Decimal,
}

#[derive(Debug, Deserialize)]
struct GateOrderBook {
    asks: Vec<GateBookLevel>,
    bids: Vec<GateBookLevel>,
    #[serde(default)]
    current: f64,
}

#[derive(Debug, Deserialize)]
struct GateTicker {
    #[serde(with = "rust_decimal::serde::str")]
    last: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    highest_bid: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    lowest_ask: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    volume_24h: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct GateContract {
    name: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    funding_rate: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    order_size_round: Option<Decimal>,
    #[serde(default)]
    order_size_min: Option<Decimal>,
    #[serde(default)]
    in_delisting: bool,
}

#[derive(Debug, Deserialize)]
struct GateOrderAck {
    id: i64,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GateFuturesAccount {
    #[serde(with = "rust_decimal::serde::str")]
    total: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    available: Decimal,
}

impl GateExchange {
    pub fn new(credentials: &VenueCredentials, requests_per_second: u32) -> anyhow::Result<Self> {
        Ok(Self {
            dispatcher: RestDispatcher::new(requests_per_second)?,
            api_key: credentials.api_key.clone(),
            secret_key: credentials.secret_key.clone(),
            base_url: BASE_URL.to_string(),
        })
    }

    /// Gate contract name for a base asset, e.g. "BTC_USDT".
    fn contract(symbol: &str) -> String {
        format!("{symbol}_USDT")
    }

    fn sign_headers(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: &str,
    ) -> [(String, String); 3] {
        let timestamp = Utc::now().timestamp().to_string();
        let message = format!(
            "{method}\n{path}\n{query}\n{}\n{timestamp}",
            sha512_hex(body)
        );
        let signature = hmac_sha512_hex(&self.secret_key, &message);
        [
            ("KEY".to_string(), self.api_key.clone()),
            ("Timestamp".to_string(), timestamp),
            ("SIGN".to_string(), signature),
        ]
    }

    async fn fetch_order_book(&self, symbol: &str, depth: u32) -> anyhow::Result<OrderBook> {
        let url = format!("{}/api/v4/futures/usdt/order_book", self.base_url);
        let contract = Self::contract(symbol);
        let limit = depth.to_string();
        let book: GateOrderBook = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .query(&[("contract", contract.as_str()), ("limit", limit.as_str())])
            })
            .await?;

        let ts = (book.current * 1000.0) as i64;
        Ok(OrderBook {
            bids: book.bids.iter().map(|l| (l.p, l.s)).collect(),
            asks: book.asks.iter().map(|l| (l.p, l.s)).collect(),
            timestamp: DateTime::from_timestamp_millis(ts).unwrap_or_else(Utc::now),
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> anyhow::Result<Ticker> {
        let url = format!("{}/api/v4/futures/usdt/tickers", self.base_url);
        let contract = Self::contract(symbol);
        let tickers: Vec<GateTicker> = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .query(&[("contract", contract.as_str())])
            })
            .await?;

        let t = tickers
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty ticker response"))?;

        Ok(Ticker {
            last: t.last,
            bid: t.highest_bid.unwrap_or(t.last),
            ask: t.lowest_ask.unwrap_or(t.last),
            volume: t.volume_24h.unwrap_or(Decimal::ZERO),
            timestamp: Utc::now(),
        })
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let path = format!("/api/v4/futures/usdt/contracts/{}", Self::contract(symbol));
        let url = format!("{}{path}", self.base_url);
        let contract: GateContract = self
            .dispatcher
            .send(|| self.dispatcher.client().get(&url))
            .await?;

        Ok(contract.funding_rate.unwrap_or(Decimal::ZERO))
    }

    async fn submit_order(&self, request: &OrderRequest) -> anyhow::Result<OrderResponse> {
        let path = "/api/v4/futures/usdt/orders";

        // Gate counts futures sizes in whole contracts, sign encodes side.
        let contracts = request
            .size
            .trunc()
            .to_i64()
            .ok_or_else(|| anyhow::anyhow!("order size out of range"))?;
        anyhow::ensure!(contracts > 0, "order size rounds to zero contracts");
        let signed_size = match request.side {
            OrderSide::Buy => contracts,
            OrderSide::Sell => -contracts,
        };

        let body = serde_json::json!({
            "contract": Self::contract(&request.symbol),
            "size": signed_size,
            "price": "0",
            "tif": "ioc",
        });
        let body_text = body.to_string();

        let url = format!("{}{path}", self.base_url);
        let mut req = self
            .dispatcher
            .client()
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body_text.clone());
        for (name, value) in self.sign_headers("POST", path, "", &body_text) {
            req = req.header(name, value);
        }

        let ack: GateOrderAck = self.dispatcher.send_once(req).await?;
        let status = match ack.status.as_deref() {
            Some("finished") => OrderStatus::Filled,
            _ => OrderStatus::Pending,
        };

        Ok(OrderResponse {
            order_id: ack.id.to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            size: request.size,
            executed_size: Decimal::ZERO,
            price: Decimal::ZERO,
            status,
            timestamp: Utc::now(),
            fee: Decimal::ZERO,
        })
    }

    async fn fetch_balances(&self) -> anyhow::Result<Vec<ExchangeBalance>> {
        let path = "/api/v4/futures/usdt/accounts";
        let url = format!("{}{path}", self.base_url);
        let mut req = self.dispatcher.client().get(&url);
        for (name, value) in self.sign_headers("GET", path, "", "") {
            req = req.header(name, value);
        }

        let account: GateFuturesAccount = self.dispatcher.send_once(req).await?;
        Ok(vec![ExchangeBalance {
            currency: "USDT".to_string(),
            free: account.available,
            used: account.total - account.available,
            total: account.total,
        }])
    }

    async fn fetch_symbols(&self) -> anyhow::Result<Vec<SymbolInfo>> {
        let url = format!("{}/api/v4/futures/usdt/contracts", self.base_url);
        let contracts: Vec<GateContract> = self
            .dispatcher
            .send(|| self.dispatcher.client().get(&url))
            .await?;

        Ok(contracts
            .into_iter()
            .filter(|c| !c.in_delisting)
            .filter_map(|c| {
                let base = c.name.strip_suffix("_USDT")?.to_string();
                Some(SymbolInfo {
                    symbol: base,
                    size_precision: c.order_size_round.map(|r| r.scale()).unwrap_or(0),
                    min_size: c.order_size_min.unwrap_or(Decimal::ONE),
                    min_notional: dec!(1), // 1 USDT venue minimum
                })
            })
            .collect())
    }
}

#[async_trait]
impl Exchange for GateExchange {
    fn venue(&self) -> Venue {
        Venue::Gate
    }

    async fn get_order_book(&self, symbol: &str, depth: u32) -> Option<OrderBook> {
        self.fetch_order_book(symbol, depth)
            .await
            .map_err(|e| warn!(venue = "gate", %symbol, error = %e, "Orderbook fetch failed"))
            .ok()
    }

    async fn get_ticker(&self, symbol: &str) -> Option<Ticker> {
        self.fetch_ticker(symbol)
            .await
            .map_err(|e| warn!(venue = "gate", %symbol, error = %e, "Ticker fetch failed"))
            .ok()
    }

    async fn get_funding_rate(&self, symbol: &str) -> Option<Decimal> {
        self.fetch_funding_rate(symbol)
            .await
            .map_err(|e| warn!(venue = "gate", %symbol, error = %e, "Funding rate fetch failed"))
            .ok()
    }

    async fn place_order(&self, request: &OrderRequest) -> Option<OrderResponse> {
        self.submit_order(request)
            .await
            .map_err(|e| {
                warn!(venue = "gate", symbol = %request.symbol, error = %e, "Order failed")
            })
            .ok()
    }

    async fn get_balances(&self) -> Vec<ExchangeBalance> {
        self.fetch_balances()
            .await
            .map_err(|e| warn!(venue = "gate", error = %e, "Balance fetch failed"))
            .unwrap_or_default()
    }

    async fn get_symbols(&self) -> Vec<SymbolInfo> {
        self.fetch_symbols()
            .await
            .map_err(|e| warn!(venue = "gate", error = %e, "Symbol fetch failed"))
            .unwrap_or_default()
    }
}
