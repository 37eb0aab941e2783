//! Cross-market premium measurement.
//!
//! The premium compares a domestic KRW spot ask against a foreign USDT
//! perpetual bid, with the domestic side converted into USDT through that
//! venue's own USDT/KRW market:
//!
//! ```text
//! premium% = ((domestic_ask / fx) - foreign_bid) / foreign_bid * 100
//! ```
//!
//! A negative value (reverse premium) means the domestic side trades below
//! the foreign side and the split entry is attractive.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::exchange::{ExchangeRegistry, MarketSide, Venue};

/// Used until a live USDT/KRW quote has been observed on a venue.
pub const FALLBACK_USDT_KRW: Decimal = dec!(1365);

const HUNDRED: Decimal = dec!(100);

/// Per-domestic-venue USDT/KRW conversion rates.
///
/// Each domestic venue lists a USDT market in KRW; its last trade price is
/// the conversion rate for books on that venue. A venue whose refresh fails
/// keeps its previous rate, or the fallback if none was ever seen.
#[derive(Debug, Default)]
pub struct RateCalculator {
    rates: RwLock<HashMap<Venue, Decimal>>,
}

impl RateCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull a fresh USDT/KRW last price from every domestic venue.
    pub async fn refresh(&self, registry: &ExchangeRegistry) {
        for venue in registry.venues_on(MarketSide::Domestic) {
            match registry.get_ticker(venue, "USDT").await {
                Some(ticker) if ticker.last > Decimal::ZERO => {
                    debug!(%venue, rate = %ticker.last, "Refreshed USDT/KRW rate");
                    self.rates.write().await.insert(venue, ticker.last);
                }
                _ => {
                    let current = self.usdt_krw(venue).await;
                    warn!(%venue, rate = %current, "USDT/KRW refresh failed, keeping rate");
                }
            }
        }
    }

    /// Current USDT/KRW rate for a venue, falling back when never refreshed.
    pub async fn usdt_krw(&self, venue: Venue) -> Decimal {
        self.rates
            .read()
            .await
            .get(&venue)
            .copied()
            .unwrap_or(FALLBACK_USDT_KRW)
    }

    #[cfg(test)]
    pub async fn set_rate(&self, venue: Venue, rate: Decimal) {
        self.rates.write().await.insert(venue, rate);
    }
}

/// One actionable premium observation.
#[derive(Debug, Clone)]
pub struct PremiumQuote {
    pub symbol: String,
    /// Percent; negative is a reverse premium.
    pub premium: Decimal,
    pub domestic_venue: Venue,
    pub domestic_ask: Decimal,
    pub domestic_ask_size: Decimal,
    pub foreign_venue: Venue,
    pub foreign_bid: Decimal,
    pub foreign_bid_size: Decimal,
    pub funding_rate: Decimal,
    pub usdt_krw: Decimal,
}

/// Finds the best executable premium for a symbol across venue pairs.
pub struct PremiumEngine {
    registry: Arc<ExchangeRegistry>,
    rates: Arc<RateCalculator>,
}

impl PremiumEngine {
    pub fn new(registry: Arc<ExchangeRegistry>, rates: Arc<RateCalculator>) -> Self {
        Self { registry, rates }
    }

    pub fn rates(&self) -> &Arc<RateCalculator> {
        &self.rates
    }

    /// Raw premium formula.
    pub fn premium_pct(
        domestic_ask: Decimal,
        foreign_bid: Decimal,
        usdt_krw: Decimal,
    ) -> Option<Decimal> {
        if foreign_bid <= Decimal::ZERO || usdt_krw <= Decimal::ZERO {
            return None;
        }
        let domestic_usdt = domestic_ask / usdt_krw;
        Some((domestic_usdt - foreign_bid) / foreign_bid * HUNDRED)
    }

    /// Best premium for one symbol: cheapest domestic ask against the
    /// highest foreign bid among venues whose funding rate is known and
    /// non-negative. Venues that fail to answer are skipped for this pass;
    /// `None` means no executable pair exists right now.
    pub async fn best_premium(&self, symbol: &str) -> Option<PremiumQuote> {
        let domestic = self.best_domestic_ask(symbol).await;
        let foreign = self.best_foreign_bid(symbol).await;
        let (domestic_venue, ask, ask_size) = domestic?;
        let (foreign_venue, bid, bid_size, funding_rate) = foreign?;
        self.compose(
            symbol,
            (domestic_venue, ask, ask_size),
            (foreign_venue, bid, bid_size, funding_rate),
        )
        .await
    }

    /// Fresh quote for the venue pair a position is pinned to, used when
    /// adding slices. The funding gate still applies.
    pub async fn pinned_entry_premium(
        &self,
        symbol: &str,
        domestic: Venue,
        foreign: Venue,
    ) -> Option<PremiumQuote> {
        let (ask, ask_size) = self.ask_on(domestic, symbol).await?;
        let (bid, bid_size, funding) = self.bid_on(foreign, symbol, true).await?;
        self.compose(
            symbol,
            (domestic, ask, ask_size),
            (foreign, bid, bid_size, funding),
        )
        .await
    }

    /// Fresh quote for the pinned pair while unwinding. Funding never blocks
    /// an exit.
    pub async fn exit_premium(
        &self,
        symbol: &str,
        domestic: Venue,
        foreign: Venue,
    ) -> Option<PremiumQuote> {
        let (ask, ask_size) = self.ask_on(domestic, symbol).await?;
        let (bid, bid_size, funding) = self.bid_on(foreign, symbol, false).await?;
        self.compose(
            symbol,
            (domestic, ask, ask_size),
            (foreign, bid, bid_size, funding),
        )
        .await
    }

    async fn compose(
        &self,
        symbol: &str,
        (domestic_venue, ask, ask_size): (Venue, Decimal, Decimal),
        (foreign_venue, bid, bid_size, funding_rate): (Venue, Decimal, Decimal, Decimal),
    ) -> Option<PremiumQuote> {
        let usdt_krw = self.rates.usdt_krw(domestic_venue).await;
        let premium = Self::premium_pct(ask, bid, usdt_krw)?;

        debug!(
            %symbol,
            premium = %premium,
            domestic = %domestic_venue,
            foreign = %foreign_venue,
            "Premium computed"
        );

        Some(PremiumQuote {
            symbol: symbol.to_string(),
            premium,
            domestic_venue,
            domestic_ask: ask,
            domestic_ask_size: ask_size,
            foreign_venue,
            foreign_bid: bid,
            foreign_bid_size: bid_size,
            funding_rate,
            usdt_krw,
        })
    }

    async fn ask_on(&self, venue: Venue, symbol: &str) -> Option<(Decimal, Decimal)> {
        let book = self.registry.get_order_book(venue, symbol, 1).await?;
        let (ask, size) = book.best_ask()?;
        (ask > Decimal::ZERO).then_some((ask, size))
    }

    /// Bid and funding on one foreign venue. With `gate_funding`, an unknown
    /// or negative funding rate disqualifies the venue.
    async fn bid_on(
        &self,
        venue: Venue,
        symbol: &str,
        gate_funding: bool,
    ) -> Option<(Decimal, Decimal, Decimal)> {
        let funding = match self.registry.get_funding_rate(venue, symbol).await {
            Some(rate) if gate_funding && rate < Decimal::ZERO => {
                debug!(%venue, %symbol, funding = %rate, "Negative funding, venue skipped");
                return None;
            }
            Some(rate) => rate,
            None if gate_funding => {
                debug!(%venue, %symbol, "Funding rate unavailable, venue skipped");
                return None;
            }
            None => Decimal::ZERO,
        };
        let book = self.registry.get_order_book(venue, symbol, 1).await?;
        let (bid, size) = book.best_bid()?;
        (bid > Decimal::ZERO).then_some((bid, size, funding))
    }

    async fn best_domestic_ask(&self, symbol: &str) -> Option<(Venue, Decimal, Decimal)> {
        let mut best: Option<(Venue, Decimal, Decimal)> = None;
        for venue in self.registry.venues_on(MarketSide::Domestic) {
            let Some((ask, size)) = self.ask_on(venue, symbol).await else {
                continue;
            };
            if best.map_or(true, |(_, current, _)| ask < current) {
                best = Some((venue, ask, size));
            }
        }
        best
    }

    async fn best_foreign_bid(&self, symbol: &str) -> Option<(Venue, Decimal, Decimal, Decimal)> {
        let mut best: Option<(Venue, Decimal, Decimal, Decimal)> = None;
        for venue in self.registry.venues_on(MarketSide::Foreign) {
            let Some((bid, size, funding)) = self.bid_on(venue, symbol, true).await else {
                continue;
            };
            if best.map_or(true, |(_, current, _, _)| bid > current) {
                best = Some((venue, bid, size, funding));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;

    async fn setup() -> (Arc<MockExchange>, Arc<MockExchange>, PremiumEngine) {
        let upbit = Arc::new(MockExchange::new(Venue::Upbit));
        let okx = Arc::new(MockExchange::new(Venue::Okx));
        let mut registry = ExchangeRegistry::new();
        registry.register(upbit.clone());
        registry.register(okx.clone());

        let rates = Arc::new(RateCalculator::new());
        rates.set_rate(Venue::Upbit, dec!(1000)).await;
        let engine = PremiumEngine::new(Arc::new(registry), rates);
        (upbit, okx, engine)
    }

    #[tokio::test]
    async fn test_positive_premium_from_worked_numbers() {
        let (upbit, okx, engine) = setup().await;
        // 100300 KRW ask at 1000 KRW/USDT against a 100 USDT bid: +0.3%.
        upbit
            .set_book("BTC", dec!(100200), dec!(1), dec!(100300), dec!(1))
            .await;
        okx.set_book("BTC", dec!(100), dec!(10), dec!(100.1), dec!(10))
            .await;
        okx.set_funding_rate("BTC", dec!(0.0001)).await;

        let quote = engine.best_premium("BTC").await.unwrap();
        assert_eq!(quote.premium, dec!(0.3));
        assert_eq!(quote.domestic_venue, Venue::Upbit);
        assert_eq!(quote.foreign_venue, Venue::Okx);
    }

    #[tokio::test]
    async fn test_reverse_premium() {
        let (upbit, okx, engine) = setup().await;
        // 99000 KRW ask at 1000 KRW/USDT against a 100 USDT bid: -1.0%.
        upbit
            .set_book("BTC", dec!(98900), dec!(1), dec!(99000), dec!(1))
            .await;
        okx.set_book("BTC", dec!(100), dec!(10), dec!(100.1), dec!(10))
            .await;
        okx.set_funding_rate("BTC", Decimal::ZERO).await;

        let quote = engine.best_premium("BTC").await.unwrap();
        assert_eq!(quote.premium, dec!(-1.0));
        assert_eq!(quote.funding_rate, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_negative_funding_excludes_foreign_venue() {
        let (upbit, okx, engine) = setup().await;
        upbit
            .set_book("BTC", dec!(98900), dec!(1), dec!(99000), dec!(1))
            .await;
        okx.set_book("BTC", dec!(100), dec!(10), dec!(100.1), dec!(10))
            .await;
        okx.set_funding_rate("BTC", dec!(-0.0002)).await;

        assert!(engine.best_premium("BTC").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_side_yields_no_quote() {
        let (upbit, _okx, engine) = setup().await;
        upbit
            .set_book("BTC", dec!(98900), dec!(1), dec!(99000), dec!(1))
            .await;
        // Foreign book never scripted.
        assert!(engine.best_premium("BTC").await.is_none());
    }

    #[tokio::test]
    async fn test_fallback_rate_applies_until_refresh() {
        let rates = RateCalculator::new();
        assert_eq!(rates.usdt_krw(Venue::Upbit).await, FALLBACK_USDT_KRW);
    }

    #[tokio::test]
    async fn test_refresh_reads_domestic_usdt_market() {
        let (upbit, _okx, engine) = setup().await;
        upbit.set_last_price("USDT", dec!(1420)).await;
        engine.rates().refresh(&engine.registry).await;
        assert_eq!(engine.rates().usdt_krw(Venue::Upbit).await, dec!(1420));
    }
}
