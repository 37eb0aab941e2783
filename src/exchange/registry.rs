//! Routing layer over the configured venue adapters.
//!
//! Holds one authenticated adapter per enabled venue and routes engine
//! calls by venue id. Construction fails fast on misconfiguration (unknown
//! venue name, missing credentials); runtime venue failures stay recoverable
//! and surface as `None` from the adapter itself.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{error, info};

use super::traits::{Exchange, MarketSide, Venue};
use super::types::{OrderBook, OrderRequest, OrderResponse, SymbolInfo, Ticker};

pub struct ExchangeRegistry {
    venues: HashMap<Venue, Arc<dyn Exchange>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self {
            venues: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn Exchange>) {
        let venue = adapter.venue();
        info!(%venue, "Registered exchange adapter");
        self.venues.insert(venue, adapter);
    }

    pub fn get(&self, venue: Venue) -> Option<&Arc<dyn Exchange>> {
        self.venues.get(&venue)
    }

    /// Enabled venues on one side of the trade.
    pub fn venues_on(&self, side: MarketSide) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self
            .venues
            .keys()
            .copied()
            .filter(|v| v.market_side() == side)
            .collect();
        venues.sort_by_key(|v| v.to_string());
        venues
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    pub async fn get_order_book(&self, venue: Venue, symbol: &str, depth: u32) -> Option<OrderBook> {
        self.get(venue)?.get_order_book(symbol, depth).await
    }

    pub async fn get_ticker(&self, venue: Venue, symbol: &str) -> Option<Ticker> {
        self.get(venue)?.get_ticker(symbol).await
    }

    pub async fn get_funding_rate(&self, venue: Venue, symbol: &str) -> Option<Decimal> {
        self.get(venue)?.get_funding_rate(symbol).await
    }

    pub async fn place_order(&self, venue: Venue, request: &OrderRequest) -> Option<OrderResponse> {
        match self.get(venue) {
            Some(adapter) => adapter.place_order(request).await,
            None => {
                error!(%venue, "Order routed to unregistered venue");
                None
            }
        }
    }

    /// Per-venue symbol rules, used to seed the sizing cache at startup.
    pub async fn get_symbols(&self, venue: Venue) -> Vec<SymbolInfo> {
        match self.get(venue) {
            Some(adapter) => adapter.get_symbols().await,
            None => Vec::new(),
        }
    }

    /// Probe every venue with a balance call; a venue is live when the call
    /// comes back at all.
    pub async fn check_connections(&self) -> HashMap<Venue, bool> {
        let mut results = HashMap::new();
        for (&venue, adapter) in &self.venues {
            let ok = !adapter.get_balances().await.is_empty();
            if ok {
                info!(%venue, "Connection check passed");
            } else {
                error!(%venue, "Connection check failed");
            }
            results.insert(venue, ok);
        }
        results
    }

    /// True when at least one venue on each side answered the probe.
    pub fn sides_covered(results: &HashMap<Venue, bool>) -> bool {
        let live = |side: MarketSide| {
            results
                .iter()
                .any(|(v, &ok)| ok && v.market_side() == side)
        };
        live(MarketSide::Domestic) && live(MarketSide::Foreign)
    }
}

impl Default for ExchangeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a registry from configuration. Unknown venue names have already
/// failed during config parsing; missing credentials fail here.
pub fn build_registry(config: &crate::config::Config) -> Result<ExchangeRegistry> {
    use super::bithumb::BithumbExchange;
    use super::gate::GateExchange;
    use super::okx::OkxExchange;
    use super::upbit::UpbitExchange;

    let mut registry = ExchangeRegistry::new();
    let rps = config.rate_limit_per_second;

    for venue in &config.venues.enabled {
        let credentials = config
            .venues
            .credentials_for(*venue)
            .ok_or_else(|| anyhow::anyhow!("missing credentials for venue {venue}"))?;

        let adapter: Arc<dyn Exchange> = match venue {
            Venue::Upbit => Arc::new(UpbitExchange::new(credentials, rps)?),
            Venue::Bithumb => Arc::new(BithumbExchange::new(credentials, rps)?),
            Venue::Okx => Arc::new(OkxExchange::new(credentials, rps)?),
            Venue::Gate => Arc::new(GateExchange::new(credentials, rps)?),
        };
        registry.register(adapter);
    }

    anyhow::ensure!(
        !registry.venues_on(MarketSide::Domestic).is_empty(),
        "no domestic venue enabled"
    );
    anyhow::ensure!(
        !registry.venues_on(MarketSide::Foreign).is_empty(),
        "no foreign venue enabled"
    );

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;

    #[tokio::test]
    async fn test_routes_by_venue() {
        let mut registry = ExchangeRegistry::new();
        registry.register(Arc::new(MockExchange::new(Venue::Upbit)));
        registry.register(Arc::new(MockExchange::new(Venue::Okx)));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(Venue::Upbit).is_some());
        assert!(registry.get(Venue::Gate).is_none());
        assert_eq!(registry.venues_on(MarketSide::Domestic), vec![Venue::Upbit]);
        assert_eq!(registry.venues_on(MarketSide::Foreign), vec![Venue::Okx]);
    }

    #[tokio::test]
    async fn test_order_to_unregistered_venue_is_none() {
        let registry = ExchangeRegistry::new();
        let request = OrderRequest::market("BTC", crate::exchange::OrderSide::Buy, Decimal::ONE);
        assert!(registry.place_order(Venue::Gate, &request).await.is_none());
    }

    #[test]
    fn test_sides_covered() {
        let mut results = HashMap::new();
        results.insert(Venue::Upbit, true);
        results.insert(Venue::Okx, false);
        assert!(!ExchangeRegistry::sides_covered(&results));
        results.insert(Venue::Okx, true);
        assert!(ExchangeRegistry::sides_covered(&results));
    }
}
