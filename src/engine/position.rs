//! Per-symbol position state and the shared position book.
//!
//! The book is the engine's only mutable shared state. It lives behind one
//! `RwLock` so the idle-to-entering transition can check the global
//! concurrent-position cap and claim the symbol under a single write lock;
//! two symbols can never both pass the cap check and jointly exceed it.
//!
//! Positions are process-lifetime and in-memory: a symbol's entry is reset
//! to the empty idle state when its last slice exits, never removed, and a
//! restart forgets everything. The book is injected into the engine so a
//! persisted implementation can replace it without engine changes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::exchange::Venue;
use crate::utils::decimal::weighted_average;

/// Lifecycle of one symbol's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionStatus {
    #[default]
    Idle,
    Entering,
    Holding,
    Exiting,
}

/// One filled entry slice, unwound FIFO.
#[derive(Debug, Clone)]
pub struct SliceEntry {
    pub timestamp: DateTime<Utc>,
    pub notional_krw: Decimal,
    pub premium: Decimal,
    pub spot_price: Decimal,
    pub futures_price: Decimal,
    pub spot_size: Decimal,
    pub futures_size: Decimal,
}

/// Position state for one symbol.
///
/// Invariants, maintained by every [`PositionBook`] mutation:
/// - `entry_count == entries.len()`
/// - `total_notional_krw` equals the sum of open slice notionals
/// - `status == Idle` exactly when `entry_count == 0`
#[derive(Debug, Clone, Default)]
pub struct Position {
    pub entry_count: usize,
    pub total_notional_krw: Decimal,
    /// Venue pair chosen when the cycle starts, fixed until the position
    /// closes. Spot must be sold where it is held and the short covered
    /// where it was opened.
    pub domestic_venue: Option<Venue>,
    pub foreign_venue: Option<Venue>,
    pub entries: VecDeque<SliceEntry>,
    pub avg_entry_premium: Decimal,
    pub status: PositionStatus,
}

impl Position {
    fn recompute_average(&mut self) {
        let weights: Vec<(Decimal, Decimal)> = self
            .entries
            .iter()
            .map(|e| (e.premium, e.notional_krw))
            .collect();
        self.avg_entry_premium = weighted_average(&weights);
    }
}

/// Operator snapshot of one open position.
#[derive(Debug, Clone)]
pub struct PositionSummary {
    pub symbol: String,
    pub entry_count: usize,
    pub total_notional_krw: Decimal,
    pub avg_entry_premium: Decimal,
    pub foreign_venue: Option<Venue>,
}

/// The per-symbol position map.
#[derive(Debug, Default)]
pub struct PositionBook {
    inner: RwLock<HashMap<String, Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status(&self, symbol: &str) -> PositionStatus {
        self.inner
            .read()
            .await
            .get(symbol)
            .map(|p| p.status)
            .unwrap_or_default()
    }

    /// Cloned view of a symbol's position (lazily created as idle).
    pub async fn snapshot(&self, symbol: &str) -> Position {
        self.inner
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// Symbols currently in entering/holding/exiting.
    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|p| p.status != PositionStatus::Idle)
            .count()
    }

    /// Atomic idle-to-entering gate.
    ///
    /// Under one write lock: the symbol must be idle, and the number of
    /// non-idle symbols must be below `max_concurrent`. On success the
    /// symbol is claimed (`Entering`) and the cycle's venue pair pinned.
    pub async fn try_begin_entry(
        &self,
        symbol: &str,
        max_concurrent: usize,
        domestic_venue: Venue,
        foreign_venue: Venue,
    ) -> bool {
        let mut book = self.inner.write().await;

        let active = book
            .values()
            .filter(|p| p.status != PositionStatus::Idle)
            .count();
        if active >= max_concurrent {
            return false;
        }

        let position = book.entry(symbol.to_string()).or_default();
        if position.status != PositionStatus::Idle {
            return false;
        }

        position.status = PositionStatus::Entering;
        position.domestic_venue = Some(domestic_venue);
        position.foreign_venue = Some(foreign_venue);
        true
    }

    /// Holding-to-exiting transition; refused unless slices are open.
    pub async fn try_begin_exit(&self, symbol: &str) -> bool {
        let mut book = self.inner.write().await;
        match book.get_mut(symbol) {
            Some(p) if p.status == PositionStatus::Holding && p.entry_count > 0 => {
                p.status = PositionStatus::Exiting;
                true
            }
            _ => false,
        }
    }

    /// Append a filled slice and refresh the weighted average premium.
    pub async fn record_entry(&self, symbol: &str, slice: SliceEntry) {
        let mut book = self.inner.write().await;
        let position = book.entry(symbol.to_string()).or_default();
        position.total_notional_krw += slice.notional_krw;
        position.entries.push_back(slice);
        position.entry_count = position.entries.len();
        position.recompute_average();
    }

    /// Close out the entering phase: holding if anything filled, else reset.
    pub async fn finish_entry(&self, symbol: &str) {
        let mut book = self.inner.write().await;
        if let Some(position) = book.get_mut(symbol) {
            if position.entry_count > 0 {
                position.status = PositionStatus::Holding;
            } else {
                *position = Position::default();
            }
        }
    }

    /// Detach the oldest open slice for unwinding.
    pub async fn pop_oldest(&self, symbol: &str) -> Option<SliceEntry> {
        let mut book = self.inner.write().await;
        let position = book.get_mut(symbol)?;
        let slice = position.entries.pop_front()?;
        position.entry_count = position.entries.len();
        position.total_notional_krw -= slice.notional_krw;
        position.recompute_average();
        Some(slice)
    }

    /// Put a slice back at the front after a failed unwind.
    pub async fn restore_front(&self, symbol: &str, slice: SliceEntry) {
        let mut book = self.inner.write().await;
        let position = book.entry(symbol.to_string()).or_default();
        position.total_notional_krw += slice.notional_krw;
        position.entries.push_front(slice);
        position.entry_count = position.entries.len();
        position.recompute_average();
    }

    /// Close out the exiting phase: reset when flat, otherwise back to
    /// holding.
    pub async fn finish_exit(&self, symbol: &str) {
        let mut book = self.inner.write().await;
        if let Some(position) = book.get_mut(symbol) {
            if position.entry_count == 0 {
                *position = Position::default();
            } else {
                position.status = PositionStatus::Holding;
            }
        }
    }

    /// Snapshot of every symbol with open slices, for status reporting.
    pub async fn summary(&self) -> Vec<PositionSummary> {
        let book = self.inner.read().await;
        let mut rows: Vec<PositionSummary> = book
            .iter()
            .filter(|(_, p)| p.entry_count > 0)
            .map(|(symbol, p)| PositionSummary {
                symbol: symbol.clone(),
                entry_count: p.entry_count,
                total_notional_krw: p.total_notional_krw,
                avg_entry_premium: p.avg_entry_premium,
                foreign_venue: p.foreign_venue,
            })
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn slice(premium: Decimal, notional: Decimal) -> SliceEntry {
        SliceEntry {
            timestamp: Utc::now(),
            notional_krw: notional,
            premium,
            spot_price: dec!(99000000),
            futures_price: dec!(100),
            spot_size: dec!(0.1),
            futures_size: dec!(0.1),
        }
    }

    #[tokio::test]
    async fn test_invariants_hold_through_entries_and_exits() {
        let book = PositionBook::new();
        assert!(book.try_begin_entry("BTC", 5, Venue::Upbit, Venue::Okx).await);

        for _ in 0..3 {
            book.record_entry("BTC", slice(dec!(-1.0), dec!(10000))).await;
        }
        book.finish_entry("BTC").await;

        let p = book.snapshot("BTC").await;
        assert_eq!(p.entry_count, p.entries.len());
        assert_eq!(p.total_notional_krw, dec!(30000));
        assert_eq!(p.status, PositionStatus::Holding);

        assert!(book.try_begin_exit("BTC").await);
        book.pop_oldest("BTC").await.unwrap();
        book.finish_exit("BTC").await;

        let p = book.snapshot("BTC").await;
        assert_eq!(p.entry_count, 2);
        assert_eq!(p.total_notional_krw, dec!(20000));
        assert_eq!(p.status, PositionStatus::Holding);
    }

    #[tokio::test]
    async fn test_last_exit_resets_to_idle_default() {
        let book = PositionBook::new();
        assert!(book.try_begin_entry("XRP", 5, Venue::Upbit, Venue::Gate).await);
        book.record_entry("XRP", slice(dec!(-1.5), dec!(10000))).await;
        book.finish_entry("XRP").await;

        assert!(book.try_begin_exit("XRP").await);
        book.pop_oldest("XRP").await.unwrap();
        book.finish_exit("XRP").await;

        let p = book.snapshot("XRP").await;
        assert_eq!(p.status, PositionStatus::Idle);
        assert_eq!(p.entry_count, 0);
        assert_eq!(p.total_notional_krw, Decimal::ZERO);
        assert_eq!(p.avg_entry_premium, Decimal::ZERO);
        assert!(p.foreign_venue.is_none());
        assert_eq!(book.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_average_premium_is_notional_weighted() {
        let book = PositionBook::new();
        assert!(book.try_begin_entry("ETH", 5, Venue::Upbit, Venue::Okx).await);
        book.record_entry("ETH", slice(dec!(-1.2), dec!(10000))).await;
        book.record_entry("ETH", slice(dec!(-1.1), dec!(10000))).await;
        book.record_entry("ETH", slice(dec!(-1.0), dec!(10000))).await;

        let p = book.snapshot("ETH").await;
        assert_eq!(p.avg_entry_premium, dec!(-1.1));

        // Same multiset in a different order produces the same average.
        let other = PositionBook::new();
        assert!(other.try_begin_entry("ETH", 5, Venue::Upbit, Venue::Okx).await);
        other.record_entry("ETH", slice(dec!(-1.0), dec!(10000))).await;
        other.record_entry("ETH", slice(dec!(-1.2), dec!(10000))).await;
        other.record_entry("ETH", slice(dec!(-1.1), dec!(10000))).await;
        assert_eq!(
            other.snapshot("ETH").await.avg_entry_premium,
            p.avg_entry_premium
        );
    }

    #[tokio::test]
    async fn test_fifo_pop_and_restore() {
        let book = PositionBook::new();
        assert!(book.try_begin_entry("SOL", 5, Venue::Upbit, Venue::Gate).await);
        book.record_entry("SOL", slice(dec!(-1.2), dec!(10000))).await;
        book.record_entry("SOL", slice(dec!(-1.1), dec!(10000))).await;

        let oldest = book.pop_oldest("SOL").await.unwrap();
        assert_eq!(oldest.premium, dec!(-1.2));

        book.restore_front("SOL", oldest).await;
        let p = book.snapshot("SOL").await;
        assert_eq!(p.entry_count, 2);
        assert_eq!(p.entries.front().unwrap().premium, dec!(-1.2));
    }

    #[tokio::test]
    async fn test_concurrent_position_cap_is_atomic() {
        let book = PositionBook::new();
        assert!(book.try_begin_entry("BTC", 2, Venue::Upbit, Venue::Okx).await);
        assert!(book.try_begin_entry("ETH", 2, Venue::Upbit, Venue::Okx).await);
        // Third symbol satisfies entry conditions but the cap is taken.
        assert!(!book.try_begin_entry("XRP", 2, Venue::Upbit, Venue::Okx).await);
        assert_eq!(book.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_exit_refused_when_flat_or_not_holding() {
        let book = PositionBook::new();
        assert!(!book.try_begin_exit("BTC").await);

        assert!(book.try_begin_entry("BTC", 5, Venue::Upbit, Venue::Okx).await);
        // Still entering, nothing filled: no exit.
        assert!(!book.try_begin_exit("BTC").await);
        book.finish_entry("BTC").await; // resets to idle, nothing filled
        assert!(!book.try_begin_exit("BTC").await);
    }

    #[tokio::test]
    async fn test_reentry_blocked_while_active() {
        let book = PositionBook::new();
        assert!(book.try_begin_entry("BTC", 5, Venue::Upbit, Venue::Okx).await);
        assert!(!book.try_begin_entry("BTC", 5, Venue::Upbit, Venue::Okx).await);
    }
}
