//! Split-entry execution engine.
//!
//! One scan loop walks the tradable symbol universe. A symbol whose
//! premium crosses the entry threshold is claimed in the position book and
//! handed to a dedicated entry task that accumulates fixed-notional slices
//! (domestic spot buy paired with a foreign perpetual short) until the
//! per-symbol cap or the signal fades. A holding symbol whose premium
//! recovers past the exit threshold gets an exit task that unwinds slices
//! oldest-first.
//!
//! Both legs of a slice are dispatched concurrently. When exactly one leg
//! fills, the surviving leg is reversed immediately with an awaited
//! compensating market order and the slice attempt counts as failed; the
//! engine never holds a knowingly one-sided position on purpose.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{FeesConfig, StrategyConfig};
use crate::exchange::{
    ExchangeRegistry, MarketSide, OrderRequest, OrderSide, SymbolInfo, Venue,
};
use crate::utils::decimal::round_down_to_precision;

use super::position::{PositionBook, PositionStatus, SliceEntry};
use super::premium::{PremiumEngine, PremiumQuote};

/// Applied to the visible foreign bid size when it cannot absorb a full
/// slice, leaving headroom against book movement between quote and order.
const DEPTH_SAFETY: Decimal = dec!(0.95);

const DEFAULT_SIZE_PRECISION: u32 = 8;

pub struct SplitEngine {
    registry: Arc<ExchangeRegistry>,
    premium: Arc<PremiumEngine>,
    positions: Arc<PositionBook>,
    strategy: StrategyConfig,
    fees: FeesConfig,
    shutdown: Arc<AtomicBool>,
    symbol_rules: RwLock<HashMap<(Venue, String), SymbolInfo>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SplitEngine {
    pub fn new(
        registry: Arc<ExchangeRegistry>,
        premium: Arc<PremiumEngine>,
        positions: Arc<PositionBook>,
        strategy: StrategyConfig,
        fees: FeesConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            premium,
            positions,
            strategy,
            fees,
            shutdown,
            symbol_rules: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn positions(&self) -> &Arc<PositionBook> {
        &self.positions
    }

    /// Main scan loop. Returns when the shutdown flag is raised and every
    /// in-flight entry/exit task has drained.
    pub async fn run(self: Arc<Self>) {
        let symbols = self.load_symbol_universe().await;
        if symbols.is_empty() {
            error!("No symbol is tradable on both market sides, nothing to scan");
            return;
        }
        info!(count = symbols.len(), "Symbol universe loaded");

        while !self.shutdown.load(Ordering::SeqCst) {
            self.premium.rates().refresh(&self.registry).await;

            for symbol in &symbols {
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                self.scan_symbol(symbol).await;
                tokio::time::sleep(Duration::from_millis(self.strategy.symbol_scan_delay_ms))
                    .await;
            }

            self.prune_finished_tasks().await;
            self.interruptible_sleep(Duration::from_secs(self.strategy.cycle_delay_secs))
                .await;
        }

        self.drain_tasks().await;
        info!("Scan loop stopped");
    }

    /// Symbols listed on at least one enabled venue of each side. Priority
    /// symbols come first in their configured order, the rest alphabetical.
    /// Also seeds the per-venue sizing rule cache.
    async fn load_symbol_universe(&self) -> Vec<String> {
        let mut domestic: Vec<String> = Vec::new();
        let mut foreign: Vec<String> = Vec::new();

        for venue in self.registry.venues_on(MarketSide::Domestic) {
            for info in self.registry.get_symbols(venue).await {
                domestic.push(info.symbol.clone());
                self.symbol_rules
                    .write()
                    .await
                    .insert((venue, info.symbol.clone()), info);
            }
        }
        for venue in self.registry.venues_on(MarketSide::Foreign) {
            for info in self.registry.get_symbols(venue).await {
                foreign.push(info.symbol.clone());
                self.symbol_rules
                    .write()
                    .await
                    .insert((venue, info.symbol.clone()), info);
            }
        }

        let mut common: Vec<String> = domestic
            .into_iter()
            .filter(|s| foreign.contains(s))
            .filter(|s| s != "USDT")
            .collect();
        common.sort();
        common.dedup();

        let mut ordered: Vec<String> = self
            .strategy
            .priority_symbols
            .iter()
            .filter(|s| common.contains(s))
            .cloned()
            .collect();
        for symbol in common {
            if !ordered.contains(&symbol) {
                ordered.push(symbol);
            }
        }
        ordered
    }

    async fn scan_symbol(self: &Arc<Self>, symbol: &str) {
        match self.positions.status(symbol).await {
            PositionStatus::Idle => self.check_entry_signal(symbol).await,
            PositionStatus::Holding => self.check_exit_signal(symbol).await,
            // A dedicated task owns the symbol right now.
            PositionStatus::Entering | PositionStatus::Exiting => {}
        }
    }

    async fn check_entry_signal(self: &Arc<Self>, symbol: &str) {
        let Some(quote) = self.premium.best_premium(symbol).await else {
            return;
        };
        if quote.premium > self.strategy.entry_threshold_pct {
            return;
        }

        let claimed = self
            .positions
            .try_begin_entry(
                symbol,
                self.strategy.max_concurrent_symbols,
                quote.domestic_venue,
                quote.foreign_venue,
            )
            .await;
        if !claimed {
            debug!(%symbol, "Entry signal dropped, concurrent position cap reached");
            return;
        }

        info!(
            %symbol,
            premium = %quote.premium,
            domestic = %quote.domestic_venue,
            foreign = %quote.foreign_venue,
            funding = %quote.funding_rate,
            "Entry signal, starting split entry"
        );
        self.spawn_task(symbol, {
            let engine = Arc::clone(self);
            let symbol = symbol.to_string();
            async move { engine.entry_loop(&symbol).await }
        })
        .await;
    }

    async fn check_exit_signal(self: &Arc<Self>, symbol: &str) {
        let position = self.positions.snapshot(symbol).await;
        let (Some(domestic), Some(foreign)) = (position.domestic_venue, position.foreign_venue)
        else {
            return;
        };
        let Some(quote) = self.premium.exit_premium(symbol, domestic, foreign).await else {
            return;
        };
        if quote.premium < self.strategy.exit_threshold_pct {
            return;
        }
        if !self.positions.try_begin_exit(symbol).await {
            return;
        }

        info!(
            %symbol,
            premium = %quote.premium,
            avg_entry = %position.avg_entry_premium,
            slices = position.entry_count,
            "Exit signal, unwinding oldest slices"
        );
        self.spawn_task(symbol, {
            let engine = Arc::clone(self);
            let symbol = symbol.to_string();
            async move { engine.exit_loop(&symbol).await }
        })
        .await;
    }

    /// Accumulate slices for a claimed symbol until the cap fills, the
    /// signal fades, a slice fails or shutdown is raised.
    async fn entry_loop(self: Arc<Self>, symbol: &str) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let position = self.positions.snapshot(symbol).await;
            let (Some(domestic), Some(foreign)) =
                (position.domestic_venue, position.foreign_venue)
            else {
                break;
            };
            if position.total_notional_krw + self.strategy.slice_notional_krw
                > self.strategy.per_symbol_cap_krw
            {
                info!(%symbol, total = %position.total_notional_krw, "Per-symbol cap reached");
                break;
            }

            // Quotes and fx from the scan pass are stale by now; refetch
            // both right before sizing.
            self.premium.rates().refresh(&self.registry).await;
            let Some(quote) = self
                .premium
                .pinned_entry_premium(symbol, domestic, foreign)
                .await
            else {
                debug!(%symbol, "No executable quote on pinned venues, entry phase over");
                break;
            };
            if quote.premium > self.strategy.entry_threshold_pct {
                info!(%symbol, premium = %quote.premium, "Premium recovered, entry phase over");
                break;
            }

            match self.execute_entry_slice(symbol, &quote).await {
                Some(slice) => {
                    self.positions.record_entry(symbol, slice).await;
                    let position = self.positions.snapshot(symbol).await;
                    info!(
                        %symbol,
                        slices = position.entry_count,
                        total = %position.total_notional_krw,
                        avg_premium = %position.avg_entry_premium,
                        "Slice filled"
                    );
                }
                None => break,
            }

            self.interruptible_sleep(Duration::from_secs(self.strategy.inter_slice_delay_secs))
                .await;
        }

        self.positions.finish_entry(symbol).await;
    }

    /// Unwind slices oldest-first while the exit condition holds.
    async fn exit_loop(self: Arc<Self>, symbol: &str) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let position = self.positions.snapshot(symbol).await;
            let (Some(domestic), Some(foreign)) =
                (position.domestic_venue, position.foreign_venue)
            else {
                break;
            };
            if position.entry_count == 0 {
                break;
            }

            let Some(quote) = self.premium.exit_premium(symbol, domestic, foreign).await else {
                debug!(%symbol, "No quote on pinned venues, pausing exit");
                break;
            };
            if quote.premium < self.strategy.exit_threshold_pct {
                info!(%symbol, premium = %quote.premium, "Premium dropped, pausing exit");
                break;
            }

            let Some(slice) = self.positions.pop_oldest(symbol).await else {
                break;
            };
            if !self
                .execute_exit_slice(symbol, domestic, foreign, &slice, &quote)
                .await
            {
                self.positions.restore_front(symbol, slice).await;
                break;
            }
        }

        self.positions.finish_exit(symbol).await;
    }

    /// One paired entry: domestic market buy by KRW spend, foreign market
    /// short. `None` means nothing was (net) opened, whether because sizing
    /// was rejected, both legs failed or one leg was compensated away.
    async fn execute_entry_slice(&self, symbol: &str, quote: &PremiumQuote) -> Option<SliceEntry> {
        let Some(sizing) = self.size_slice(symbol, quote).await else {
            warn!(%symbol, "Slice rejected by sizing constraints");
            return None;
        };

        let buy = OrderRequest::market_buy_krw(symbol, sizing.spot_size, sizing.spend_krw);
        let sell = OrderRequest::market(symbol, OrderSide::Sell, sizing.futures_size);

        let (spot, futures) = tokio::join!(
            self.registry.place_order(quote.domestic_venue, &buy),
            self.registry.place_order(quote.foreign_venue, &sell),
        );

        match (spot, futures) {
            (Some(_), Some(_)) => Some(SliceEntry {
                timestamp: chrono::Utc::now(),
                notional_krw: sizing.spend_krw,
                premium: quote.premium,
                spot_price: quote.domestic_ask,
                futures_price: quote.foreign_bid,
                spot_size: sizing.spot_size,
                futures_size: sizing.futures_size,
            }),
            (Some(_), None) => {
                error!(%symbol, venue = %quote.foreign_venue, "Short leg failed, selling spot back");
                self.compensate(
                    quote.domestic_venue,
                    OrderRequest::market(symbol, OrderSide::Sell, sizing.spot_size),
                )
                .await;
                None
            }
            (None, Some(_)) => {
                error!(%symbol, venue = %quote.domestic_venue, "Spot leg failed, covering short");
                self.compensate(
                    quote.foreign_venue,
                    OrderRequest::market(symbol, OrderSide::Buy, sizing.futures_size),
                )
                .await;
                None
            }
            (None, None) => {
                warn!(%symbol, "Both legs failed, nothing to unwind");
                None
            }
        }
    }

    /// One paired exit at the recorded entry sizes. A half-filled exit is
    /// reversed so the slice stays intact for retry.
    async fn execute_exit_slice(
        &self,
        symbol: &str,
        domestic: Venue,
        foreign: Venue,
        slice: &SliceEntry,
        quote: &PremiumQuote,
    ) -> bool {
        let sell = OrderRequest::market(symbol, OrderSide::Sell, slice.spot_size);
        let buy = OrderRequest::market(symbol, OrderSide::Buy, slice.futures_size);

        let (spot, futures) = tokio::join!(
            self.registry.place_order(domestic, &sell),
            self.registry.place_order(foreign, &buy),
        );

        match (spot, futures) {
            (Some(_), Some(_)) => {
                let spread = quote.premium - slice.premium;
                info!(
                    %symbol,
                    entry_premium = %slice.premium,
                    exit_premium = %quote.premium,
                    realized_spread_pct = %spread,
                    profit_krw = %(slice.notional_krw * spread / dec!(100)),
                    "Slice unwound"
                );
                true
            }
            (Some(_), None) => {
                error!(%symbol, venue = %domestic, "Cover leg failed, buying spot back");
                self.compensate(
                    domestic,
                    OrderRequest::market_buy_krw(
                        symbol,
                        slice.spot_size,
                        round_down_to_precision(slice.spot_size * quote.domestic_ask, 0),
                    ),
                )
                .await;
                false
            }
            (None, Some(_)) => {
                error!(%symbol, venue = %foreign, "Spot sell failed, re-shorting");
                self.compensate(
                    foreign,
                    OrderRequest::market(symbol, OrderSide::Sell, slice.futures_size),
                )
                .await;
                false
            }
            (None, None) => {
                warn!(%symbol, "Both exit legs failed, slice kept");
                false
            }
        }
    }

    /// Place the single opposite order that flattens a surviving leg. If
    /// this also fails the book is one-sided and an operator must step in.
    async fn compensate(&self, venue: Venue, request: OrderRequest) {
        match self.registry.place_order(venue, &request).await {
            Some(response) => {
                warn!(
                    %venue,
                    symbol = %request.symbol,
                    size = %request.size,
                    order_id = %response.order_id,
                    "Compensating order placed"
                );
            }
            None => {
                error!(
                    %venue,
                    symbol = %request.symbol,
                    size = %request.size,
                    "COMPENSATION FAILED, position is one-sided, manual intervention required"
                );
            }
        }
    }

    /// Size both legs of one slice from a fresh quote. Everything rounds
    /// down; a slice that cannot meet venue minimums is rejected whole.
    async fn size_slice(&self, symbol: &str, quote: &PremiumQuote) -> Option<SliceSizing> {
        let fee = self.fees.taker_fee(quote.domestic_venue);
        let slice = self.strategy.slice_notional_krw;

        let domestic_rule = self.rule_for(quote.domestic_venue, symbol).await;
        let foreign_rule = self.rule_for(quote.foreign_venue, symbol).await;
        let domestic_precision = domestic_rule
            .as_ref()
            .map_or(DEFAULT_SIZE_PRECISION, |r| r.size_precision);
        let foreign_precision = foreign_rule
            .as_ref()
            .map_or(DEFAULT_SIZE_PRECISION, |r| r.size_precision);

        let mut spend_krw = round_down_to_precision(slice, 0);
        let mut spot_size =
            round_down_to_precision(slice * (Decimal::ONE - fee) / quote.domestic_ask, domestic_precision);
        let mut futures_size =
            round_down_to_precision(slice / quote.usdt_krw / quote.foreign_bid, foreign_precision);

        // Scale the whole slice down when the visible foreign bid cannot
        // absorb the short.
        if quote.foreign_bid_size < futures_size {
            let scale = DEPTH_SAFETY * quote.foreign_bid_size / futures_size;
            futures_size = round_down_to_precision(futures_size * scale, foreign_precision);
            spot_size = round_down_to_precision(spot_size * scale, domestic_precision);
            spend_krw = round_down_to_precision(spend_krw * scale, 0);
            debug!(
                %symbol,
                available = %quote.foreign_bid_size,
                scaled_spend = %spend_krw,
                "Foreign depth short of a full slice, scaling down"
            );
        }

        if spot_size <= Decimal::ZERO || futures_size <= Decimal::ZERO {
            return None;
        }
        if let Some(rule) = &domestic_rule {
            if spot_size < rule.min_size || spend_krw < rule.min_notional {
                return None;
            }
        }
        if let Some(rule) = &foreign_rule {
            if futures_size < rule.min_size
                || futures_size * quote.foreign_bid < rule.min_notional
            {
                return None;
            }
        }

        Some(SliceSizing {
            spend_krw,
            spot_size,
            futures_size,
        })
    }

    async fn rule_for(&self, venue: Venue, symbol: &str) -> Option<SymbolInfo> {
        self.symbol_rules
            .read()
            .await
            .get(&(venue, symbol.to_string()))
            .cloned()
    }

    async fn spawn_task(
        &self,
        symbol: &str,
        future: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        let handle = tokio::spawn(future);
        if let Some(stale) = self
            .tasks
            .lock()
            .await
            .insert(symbol.to_string(), handle)
        {
            // The position status gate makes a live duplicate impossible.
            stale.abort();
        }
    }

    async fn prune_finished_tasks(&self) {
        self.tasks.lock().await.retain(|_, h| !h.is_finished());
    }

    async fn drain_tasks(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> =
            self.tasks.lock().await.drain().collect();
        for (symbol, handle) in tasks {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(%symbol, error = %e, "Entry/exit task panicked");
                }
            }
        }
    }

    /// Sleep that wakes early on shutdown, polling coarsely.
    async fn interruptible_sleep(&self, total: Duration) {
        let step = Duration::from_millis(250);
        let mut remaining = total;
        while remaining > Duration::ZERO && !self.shutdown.load(Ordering::SeqCst) {
            let chunk = remaining.min(step);
            tokio::time::sleep(chunk).await;
            remaining = remaining.saturating_sub(chunk);
        }
    }
}

struct SliceSizing {
    spend_krw: Decimal,
    spot_size: Decimal,
    futures_size: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeesConfig, StrategyConfig};
    use crate::engine::premium::RateCalculator;
    use crate::exchange::MockExchange;

    struct Harness {
        upbit: Arc<MockExchange>,
        okx: Arc<MockExchange>,
        engine: Arc<SplitEngine>,
    }

    async fn harness() -> Harness {
        let upbit = Arc::new(MockExchange::new(Venue::Upbit));
        let okx = Arc::new(MockExchange::new(Venue::Okx));
        let mut registry = ExchangeRegistry::new();
        registry.register(upbit.clone());
        registry.register(okx.clone());
        let registry = Arc::new(registry);

        let rates = Arc::new(RateCalculator::new());
        rates.set_rate(Venue::Upbit, dec!(1000)).await;
        let premium = Arc::new(PremiumEngine::new(Arc::clone(&registry), rates));

        let engine = Arc::new(SplitEngine::new(
            registry,
            premium,
            Arc::new(PositionBook::new()),
            StrategyConfig::default(),
            FeesConfig::default(),
            Arc::new(AtomicBool::new(false)),
        ));
        Harness { upbit, okx, engine }
    }

    /// Deep books at a -1.0% premium with non-negative funding.
    async fn script_entry_market(h: &Harness) {
        h.upbit
            .set_book("BTC", dec!(98900), dec!(100), dec!(99000), dec!(100))
            .await;
        h.okx
            .set_book("BTC", dec!(100), dec!(100), dec!(100.1), dec!(100))
            .await;
        h.okx.set_funding_rate("BTC", dec!(0.0001)).await;
    }

    async fn entry_quote(h: &Harness) -> PremiumQuote {
        h.engine.premium.best_premium("BTC").await.unwrap()
    }

    #[tokio::test]
    async fn test_slice_sizing_rounds_down_on_both_legs() {
        let h = harness().await;
        script_entry_market(&h).await;

        let quote = entry_quote(&h).await;
        let slice = h.engine.execute_entry_slice("BTC", &quote).await.unwrap();

        // 10000 * (1 - 0.0005) / 99000, truncated at 8 decimals.
        assert_eq!(slice.spot_size, dec!(0.10095959));
        // (10000 / 1000) / 100 exactly.
        assert_eq!(slice.futures_size, dec!(0.1));
        assert_eq!(slice.notional_krw, dec!(10000));

        let spot_orders = h.upbit.placed_orders().await;
        assert_eq!(spot_orders.len(), 1);
        assert_eq!(spot_orders[0].total_krw, Some(dec!(10000)));
        let futures_orders = h.okx.placed_orders().await;
        assert_eq!(futures_orders.len(), 1);
        assert_eq!(futures_orders[0].side, OrderSide::Sell);
        assert_eq!(futures_orders[0].size, dec!(0.1));
    }

    #[tokio::test]
    async fn test_short_leg_failure_triggers_one_compensating_sell() {
        let h = harness().await;
        script_entry_market(&h).await;
        h.okx.set_fail_orders(true);

        let quote = entry_quote(&h).await;
        assert!(h.engine.execute_entry_slice("BTC", &quote).await.is_none());

        // The spot buy went through and exactly one opposite order undid it.
        let spot_orders = h.upbit.placed_orders().await;
        assert_eq!(spot_orders.len(), 2);
        assert_eq!(spot_orders[0].side, OrderSide::Buy);
        assert_eq!(spot_orders[1].side, OrderSide::Sell);
        assert_eq!(spot_orders[1].size, spot_orders[0].size);
        assert!(h.okx.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_spot_leg_failure_triggers_one_compensating_cover() {
        let h = harness().await;
        script_entry_market(&h).await;
        h.upbit.set_fail_orders(true);

        let quote = entry_quote(&h).await;
        assert!(h.engine.execute_entry_slice("BTC", &quote).await.is_none());

        let futures_orders = h.okx.placed_orders().await;
        assert_eq!(futures_orders.len(), 2);
        assert_eq!(futures_orders[0].side, OrderSide::Sell);
        assert_eq!(futures_orders[1].side, OrderSide::Buy);
        assert_eq!(futures_orders[1].size, futures_orders[0].size);
        assert!(h.upbit.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_thin_foreign_bid_scales_slice_down() {
        let h = harness().await;
        h.upbit
            .set_book("BTC", dec!(98900), dec!(100), dec!(99000), dec!(100))
            .await;
        // Only 0.05 visible against a 0.1 short.
        h.okx
            .set_book("BTC", dec!(100), dec!(0.05), dec!(100.1), dec!(100))
            .await;
        h.okx.set_funding_rate("BTC", Decimal::ZERO).await;

        let quote = entry_quote(&h).await;
        let slice = h.engine.execute_entry_slice("BTC", &quote).await.unwrap();

        // 0.1 scaled by 0.95 * 0.05 / 0.1 = 0.0475.
        assert_eq!(slice.futures_size, dec!(0.0475));
        assert!(slice.notional_krw < dec!(10000));
        assert!(slice.spot_size < dec!(0.10095959));
    }

    #[tokio::test]
    async fn test_no_entry_signal_on_negative_funding() {
        let h = harness().await;
        script_entry_market(&h).await;
        h.okx.set_funding_rate("BTC", dec!(-0.0001)).await;

        h.engine.check_entry_signal("BTC").await;

        assert_eq!(
            h.engine.positions.status("BTC").await,
            PositionStatus::Idle
        );
        assert!(h.upbit.placed_orders().await.is_empty());
        assert!(h.okx.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_entry_signal_above_threshold() {
        let h = harness().await;
        // +0.3% premium, well above the -1.0% entry threshold.
        h.upbit
            .set_book("BTC", dec!(100200), dec!(100), dec!(100300), dec!(100))
            .await;
        h.okx
            .set_book("BTC", dec!(100), dec!(100), dec!(100.1), dec!(100))
            .await;
        h.okx.set_funding_rate("BTC", dec!(0.0001)).await;

        h.engine.check_entry_signal("BTC").await;
        assert_eq!(
            h.engine.positions.status("BTC").await,
            PositionStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_entry_loop_respects_per_symbol_cap() {
        let h = harness().await;
        script_entry_market(&h).await;
        // Drop the inter-slice delay so the loop runs to the cap quickly.
        let mut strategy = StrategyConfig::default();
        strategy.inter_slice_delay_secs = 0;
        let engine = Arc::new(SplitEngine::new(
            Arc::clone(&h.engine.registry),
            Arc::clone(&h.engine.premium),
            Arc::new(PositionBook::new()),
            strategy,
            FeesConfig::default(),
            Arc::new(AtomicBool::new(false)),
        ));

        assert!(
            engine
                .positions
                .try_begin_entry("BTC", 10, Venue::Upbit, Venue::Okx)
                .await
        );
        Arc::clone(&engine).entry_loop("BTC").await;

        let position = engine.positions.snapshot("BTC").await;
        // 30000 cap holds exactly three 10000 slices.
        assert_eq!(position.entry_count, 3);
        assert_eq!(position.total_notional_krw, dec!(30000));
        assert_eq!(position.status, PositionStatus::Holding);
        assert_eq!(h.upbit.placed_orders().await.len(), 3);
    }

    #[tokio::test]
    async fn test_exit_unwinds_fifo_and_resets() {
        let h = harness().await;
        script_entry_market(&h).await;
        let mut strategy = StrategyConfig::default();
        strategy.inter_slice_delay_secs = 0;
        let engine = Arc::new(SplitEngine::new(
            Arc::clone(&h.engine.registry),
            Arc::clone(&h.engine.premium),
            Arc::new(PositionBook::new()),
            strategy,
            FeesConfig::default(),
            Arc::new(AtomicBool::new(false)),
        ));

        assert!(
            engine
                .positions
                .try_begin_entry("BTC", 10, Venue::Upbit, Venue::Okx)
                .await
        );
        Arc::clone(&engine).entry_loop("BTC").await;
        assert_eq!(engine.positions.snapshot("BTC").await.entry_count, 3);

        // Premium recovers above the exit threshold.
        h.upbit
            .set_book("BTC", dec!(100200), dec!(100), dec!(100300), dec!(100))
            .await;
        assert!(engine.positions.try_begin_exit("BTC").await);
        Arc::clone(&engine).exit_loop("BTC").await;

        let position = engine.positions.snapshot("BTC").await;
        assert_eq!(position.entry_count, 0);
        assert_eq!(position.status, PositionStatus::Idle);

        // 3 entry buys + 3 exit sells domestic, 3 shorts + 3 covers foreign.
        assert_eq!(h.upbit.placed_orders().await.len(), 6);
        assert_eq!(h.okx.placed_orders().await.len(), 6);
    }

    #[tokio::test]
    async fn test_failed_exit_restores_slice_for_retry() {
        let h = harness().await;
        script_entry_market(&h).await;
        let engine = Arc::clone(&h.engine);

        assert!(
            engine
                .positions
                .try_begin_entry("BTC", 10, Venue::Upbit, Venue::Okx)
                .await
        );
        let quote = entry_quote(&h).await;
        let slice = engine.execute_entry_slice("BTC", &quote).await.unwrap();
        engine.positions.record_entry("BTC", slice).await;
        engine.positions.finish_entry("BTC").await;

        h.upbit
            .set_book("BTC", dec!(100200), dec!(100), dec!(100300), dec!(100))
            .await;
        h.okx.set_fail_orders(true);
        assert!(engine.positions.try_begin_exit("BTC").await);
        Arc::clone(&engine).exit_loop("BTC").await;

        let position = engine.positions.snapshot("BTC").await;
        assert_eq!(position.entry_count, 1);
        assert_eq!(position.status, PositionStatus::Holding);
    }

    #[tokio::test]
    async fn test_exit_signal_requires_open_position() {
        let h = harness().await;
        h.upbit
            .set_book("BTC", dec!(100200), dec!(100), dec!(100300), dec!(100))
            .await;
        h.okx
            .set_book("BTC", dec!(100), dec!(100), dec!(100.1), dec!(100))
            .await;
        h.okx.set_funding_rate("BTC", dec!(0.0001)).await;

        // Idle symbol at a high premium: nothing to exit, nothing traded.
        h.engine.check_exit_signal("BTC").await;
        assert!(h.upbit.placed_orders().await.is_empty());
        assert!(h.okx.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_universe_intersects_sides_and_orders_priority_first() {
        let h = harness().await;
        let info = |s: &str| SymbolInfo {
            symbol: s.to_string(),
            size_precision: 8,
            min_size: Decimal::ZERO,
            min_notional: Decimal::ZERO,
        };
        h.upbit
            .set_symbols(vec![info("BTC"), info("AAVE"), info("XRP"), info("USDT")])
            .await;
        h.okx
            .set_symbols(vec![info("XRP"), info("BTC"), info("AAVE"), info("DOGE")])
            .await;

        let universe = h.engine.load_symbol_universe().await;
        // Priority order first (BTC, XRP), then the rest alphabetical;
        // USDT is the conversion market and DOGE has no domestic listing.
        assert_eq!(universe, vec!["BTC", "XRP", "AAVE"]);
    }

    #[tokio::test]
    async fn test_sizing_rejects_below_min_notional() {
        let h = harness().await;
        script_entry_market(&h).await;
        h.engine.symbol_rules.write().await.insert(
            (Venue::Upbit, "BTC".to_string()),
            SymbolInfo {
                symbol: "BTC".to_string(),
                size_precision: 8,
                min_size: Decimal::ZERO,
                min_notional: dec!(50000),
            },
        );

        let quote = entry_quote(&h).await;
        assert!(h.engine.execute_entry_slice("BTC", &quote).await.is_none());
        assert!(h.upbit.placed_orders().await.is_empty());
        assert!(h.okx.placed_orders().await.is_empty());
    }
}
