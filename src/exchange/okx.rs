//! OKX USDT perpetual-futures adapter.
//!
//! Signs with HMAC-SHA256 over `timestamp + method + path + body`, base64
//! encoded, plus the account passphrase header. All contracts are addressed
//! as `{BASE}-USDT-SWAP` in cross-margin mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::warn;

use super::http::RestDispatcher;
use super::sign::hmac_sha256_base64;
use super::traits::{Exchange, Venue};
use super::types::{
    ExchangeBalance, OrderBook, OrderRequest, OrderResponse, OrderSide, OrderStatus, OrderType,
    SymbolInfo, Ticker,
};
use crate::config::VenueCredentials;

const BASE_URL: &str = "https://www.okx.com";

pub struct OkxExchange {
    dispatcher: RestDispatcher,
    api_key: String,
    secret_key: String,
    passphrase: String,
    base_url: String,
}

/// Every OKX response wraps its payload in this envelope.
#[derive(Debug, Deserialize)]
struct OkxEnvelope<T> {
    code: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> OkxEnvelope<T> {
    fn into_first(self) -> anyhow::Result<T> {
        anyhow::ensure!(self.code == "0", "OKX error code {}", self.code);
        self.data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty OKX data array"))
    }
}

#[derive(Debug, Deserialize)]
struct OkxBook {
    asks: Vec<Vec<String>>,
    bids: Vec<Vec<String>>,
    ts: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxTicker {
    #[serde(with = "rust_decimal::serde::str")]
    last: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    bid_px: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    ask_px: Decimal,
    #[serde(rename = "vol24h", with = "rust_decimal::serde::str")]
    vol_24h: Decimal,
    ts: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxFundingRate {
    #[serde(with = "rust_decimal::serde::str")]
    funding_rate: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxInstrument {
    inst_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    lot_sz: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    min_sz: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxOrderAck {
    ord_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxAccount {
    details: Vec<OkxBalanceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxBalanceDetail {
    ccy: String,
    avail_bal: String,
    frozen_bal: String,
    eq: String,
}

fn lenient_decimal(s: &str) -> Decimal {
    s.parse().unwrap_or(Decimal::ZERO)
}

impl OkxExchange {
    pub fn new(credentials: &VenueCredentials, requests_per_second: u32) -> anyhow::Result<Self> {
        let passphrase = credentials
            .passphrase
            .clone()
            .ok_or_else(|| anyhow::anyhow!("OKX requires a passphrase"))?;
        Ok(Self {
            dispatcher: RestDispatcher::new(requests_per_second)?,
            api_key: credentials.api_key.clone(),
            secret_key: credentials.secret_key.clone(),
            passphrase,
            base_url: BASE_URL.to_string(),
        })
    }

    /// OKX instrument id for a base asset, e.g. "BTC-USDT-SWAP".
    fn inst_id(symbol: &str) -> String {
        format!("{symbol}-USDT-SWAP")
    }

    fn sign_headers(&self, method: &str, request_path: &str, body: &str) -> [(String, String); 5] {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let message = format!("{timestamp}{method}{request_path}{body}");
        let signature = hmac_sha256_base64(&self.secret_key, &message);
        [
            ("OK-ACCESS-KEY".to_string(), self.api_key.clone()),
            ("OK-ACCESS-SIGN".to_string(), signature),
            ("OK-ACCESS-TIMESTAMP".to_string(), timestamp),
            ("OK-ACCESS-PASSPHRASE".to_string(), self.passphrase.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }

    fn parse_level(level: &[String]) -> Option<(Decimal, Decimal)> {
        let price = level.first()?.parse().ok()?;
        let size = level.get(1)?.parse().ok()?;
        Some((price, size))
    }

    async fn fetch_order_book(&self, symbol: &str, depth: u32) -> anyhow::Result<OrderBook> {
        let url = format!("{}/api/v5/market/books", self.base_url);
        let inst = Self::inst_id(symbol);
        let sz = depth.to_string();
        let envelope: OkxEnvelope<OkxBook> = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .query(&[("instId", inst.as_str()), ("sz", sz.as_str())])
            })
            .await?;

        let book = envelope.into_first()?;
        let ts = book.ts.parse::<i64>().ok();
        Ok(OrderBook {
            bids: book
                .bids
                .iter()
                .filter_map(|l| Self::parse_level(l))
                .collect(),
            asks: book
                .asks
                .iter()
                .filter_map(|l| Self::parse_level(l))
                .collect(),
            timestamp: ts
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> anyhow::Result<Ticker> {
        let url = format!("{}/api/v5/market/ticker", self.base_url);
        let inst = Self::inst_id(symbol);
        let envelope: OkxEnvelope<OkxTicker> = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .query(&[("instId", inst.as_str())])
            })
            .await?;

        let t = envelope.into_first()?;
        let ts = t.ts.parse::<i64>().ok();
        Ok(Ticker {
            last: t.last,
            bid: t.bid_px,
            ask: t.ask_px,
            volume: t.vol_24h,
            timestamp: ts
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> anyhow::Result<Decimal> {
        let url = format!("{}/api/v5/public/funding-rate", self.base_url);
        let inst = Self::inst_id(symbol);
        let envelope: OkxEnvelope<OkxFundingRate> = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .query(&[("instId", inst.as_str())])
            })
            .await?;

        Ok(envelope.into_first()?.funding_rate)
    }

    async fn submit_order(&self, request: &OrderRequest) -> anyhow::Result<OrderResponse> {
        let path = "/api/v5/trade/order";
        let side = match request.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let ord_type = match request.order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        };
        let mut body = serde_json::json!({
            "instId": Self::inst_id(&request.symbol),
            "tdMode": "cross",
            "posSide": "short", // this strategy only ever holds the short side
            "side": side,
            "ordType": ord_type,
            "sz": request.size.to_string(),
        });
        if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
            body["px"] = serde_json::Value::String(price.to_string());
        }
        let body_text = body.to_string();

        let url = format!("{}{path}", self.base_url);
        let mut req = self.dispatcher.client().post(&url).body(body_text.clone());
        for (name, value) in self.sign_headers("POST", path, &body_text) {
            req = req.header(name, value);
        }

        let envelope: OkxEnvelope<OkxOrderAck> = self.dispatcher.send_once(req).await?;
        let ack = envelope.into_first()?;

        // Fill details require a follow-up query; report the ack as pending
        // with the requested size.
        Ok(OrderResponse {
            order_id: ack.ord_id,
            symbol: request.symbol.clone(),
            side: request.side,
            size: request.size,
            executed_size: Decimal::ZERO,
            price: request.price.unwrap_or(Decimal::ZERO),
            status: OrderStatus::Pending,
            timestamp: Utc::now(),
            fee: Decimal::ZERO,
        })
    }

    async fn fetch_balances(&self) -> anyhow::Result<Vec<ExchangeBalance>> {
        let path = "/api/v5/account/balance";
        let url = format!("{}{path}", self.base_url);
        let mut req = self.dispatcher.client().get(&url);
        for (name, value) in self.sign_headers("GET", path, "") {
            req = req.header(name, value);
        }

        let envelope: OkxEnvelope<OkxAccount> = self.dispatcher.send_once(req).await?;
        let account = envelope.into_first()?;

        Ok(account
            .details
            .into_iter()
            .map(|d| ExchangeBalance {
                currency: d.ccy,
                free: lenient_decimal(&d.avail_bal),
                used: lenient_decimal(&d.frozen_bal),
                total: lenient_decimal(&d.eq),
            })
            .collect())
    }

    async fn fetch_symbols(&self) -> anyhow::Result<Vec<SymbolInfo>> {
        let url = format!("{}/api/v5/public/instruments", self.base_url);
        let envelope: OkxEnvelope<OkxInstrument> = self
            .dispatcher
            .send(|| {
                self.dispatcher
                    .client()
                    .get(&url)
                    .query(&[("instType", "SWAP")])
            })
            .await?;

        anyhow::ensure!(envelope.code == "0", "OKX error code {}", envelope.code);
        Ok(envelope
            .data
            .into_iter()
            .filter_map(|inst| {
                let base = inst.inst_id.strip_suffix("-USDT-SWAP")?.to_string();
                Some(SymbolInfo {
                    symbol: base,
                    size_precision: inst.lot_sz.scale(),
                    min_size: inst.min_sz,
                    min_notional: dec!(1), // 1 USDT venue minimum
                })
            })
            .collect())
    }
}

#[async_trait]
impl Exchange for OkxExchange {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    async fn get_order_book(&self, symbol: &str, depth: u32) -> Option<OrderBook> {
        self.fetch_order_book(symbol, depth)
            .await
            .map_err(|e| warn!(venue = "okx", %symbol, error = %e, "Orderbook fetch failed"))
            .ok()
    }

    async fn get_ticker(&self, symbol: &str) -> Option<Ticker> {
        self.fetch_ticker(symbol)
            .await
            .map_err(|e| warn!(venue = "okx", %symbol, error = %e, "Ticker fetch failed"))
            .ok()
    }

    async fn get_funding_rate(&self, symbol: &str) -> Option<Decimal> {
        self.fetch_funding_rate(symbol)
            .await
            .map_err(|e| warn!(venue = "okx", %symbol, error = %e, "Funding rate fetch failed"))
            .ok()
    }

    async fn place_order(&self, request: &OrderRequest) -> Option<OrderResponse> {
        self.submit_order(request)
            .await
            .map_err(|e| warn!(venue = "okx", symbol = %request.symbol, error = %e, "Order failed"))
            .ok()
    }

    async fn get_balances(&self) -> Vec<ExchangeBalance> {
        self.fetch_balances()
            .await
            .map_err(|e| warn!(venue = "okx", error = %e, "Balance fetch failed"))
            .unwrap_or_default()
    }

    async fn get_symbols(&self) -> Vec<SymbolInfo> {
        self.fetch_symbols()
            .await
            .map_err(|e| warn!(venue = "okx", error = %e, "Symbol fetch failed"))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inst_id_format() {
        assert_eq!(OkxExchange::inst_id("ETH"), "ETH-USDT-SWAP");
    }

    #[test]
    fn test_parse_level_ignores_extra_columns() {
        let level = vec![
            "100.5".to_string(),
            "2".to_string(),
            "0".to_string(),
            "4".to_string(),
        ];
        assert_eq!(
            OkxExchange::parse_level(&level),
            Some((dec!(100.5), dec!(2)))
        );
    }

    #[test]
    fn test_envelope_rejects_error_codes() {
        let envelope: OkxEnvelope<OkxFundingRate> = OkxEnvelope {
            code: "51000".to_string(),
            data: vec![],
        };
        assert!(envelope.into_first().is_err());
    }
}
