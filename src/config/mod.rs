//! Configuration for the split-entry arbitrage executor.
//!
//! Loaded from an optional `config` file plus `KIMP__`-prefixed environment
//! variables (credentials normally come from the environment via `.env`).
//! Malformed configuration is fatal at startup; nothing here is retried.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::Venue;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub venues: VenuesConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    /// Published per-venue REST rate limit, enforced as a minimum
    /// inter-request interval by each adapter.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
    /// Operator status log cadence.
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

/// API credentials for one venue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueCredentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// OKX only.
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuesConfig {
    /// Venues to trade on; unknown names fail deserialization.
    #[serde(default = "default_enabled_venues")]
    pub enabled: Vec<Venue>,
    #[serde(default)]
    pub upbit: VenueCredentials,
    #[serde(default)]
    pub bithumb: VenueCredentials,
    #[serde(default)]
    pub okx: VenueCredentials,
    #[serde(default)]
    pub gate: VenueCredentials,
}

impl VenuesConfig {
    /// Credentials for a venue, `None` when the key is unset.
    pub fn credentials_for(&self, venue: Venue) -> Option<&VenueCredentials> {
        let creds = match venue {
            Venue::Upbit => &self.upbit,
            Venue::Bithumb => &self.bithumb,
            Venue::Okx => &self.okx,
            Venue::Gate => &self.gate,
        };
        if creds.api_key.is_empty() {
            None
        } else {
            Some(creds)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Fixed KRW notional per slice.
    #[serde(default = "default_slice_notional")]
    pub slice_notional_krw: Decimal,
    /// Maximum KRW committed per symbol.
    #[serde(default = "default_per_symbol_cap")]
    pub per_symbol_cap_krw: Decimal,
    /// Enter while premium <= this (percent, negative).
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold_pct: Decimal,
    /// Exit while premium >= this (percent, positive).
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold_pct: Decimal,
    /// Symbols allowed in entering/holding/exiting at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_symbols: usize,
    /// Pause between slices of one symbol.
    #[serde(default = "default_inter_slice_delay")]
    pub inter_slice_delay_secs: u64,
    /// Per-symbol yield inside one scan pass (rate-limit courtesy).
    #[serde(default = "default_symbol_scan_delay")]
    pub symbol_scan_delay_ms: u64,
    /// Pause between full scan cycles.
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_secs: u64,
    /// Scanned first, in this order, before the rest of the common set.
    #[serde(default = "default_priority_symbols")]
    pub priority_symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesConfig {
    #[serde(default = "default_fee_upbit")]
    pub upbit: Decimal,
    #[serde(default = "default_fee_bithumb")]
    pub bithumb: Decimal,
    #[serde(default = "default_fee_okx")]
    pub okx: Decimal,
    #[serde(default = "default_fee_gate")]
    pub gate: Decimal,
}

impl FeesConfig {
    /// Taker fee rate for a venue.
    pub fn taker_fee(&self, venue: Venue) -> Decimal {
        match venue {
            Venue::Upbit => self.upbit,
            Venue::Bithumb => self.bithumb,
            Venue::Okx => self.okx,
            Venue::Gate => self.gate,
        }
    }
}

fn default_rate_limit() -> u32 {
    8
}

fn default_status_interval() -> u64 {
    30
}

fn default_enabled_venues() -> Vec<Venue> {
    vec![Venue::Upbit, Venue::Okx, Venue::Gate]
}

fn default_slice_notional() -> Decimal {
    Decimal::new(10_000, 0) // ₩10,000 per slice
}

fn default_per_symbol_cap() -> Decimal {
    Decimal::new(30_000, 0) // ₩30,000 per symbol (3 slices)
}

fn default_entry_threshold() -> Decimal {
    Decimal::new(-10, 1) // -1.0%
}

fn default_exit_threshold() -> Decimal {
    Decimal::new(1, 1) // +0.1%
}

fn default_max_concurrent() -> usize {
    10
}

fn default_inter_slice_delay() -> u64 {
    60
}

fn default_symbol_scan_delay() -> u64 {
    300
}

fn default_cycle_delay() -> u64 {
    5
}

fn default_priority_symbols() -> Vec<String> {
    ["BTC", "ETH", "XRP", "SOL", "DOGE"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_fee_upbit() -> Decimal {
    Decimal::new(5, 4) // 0.05%
}

fn default_fee_bithumb() -> Decimal {
    Decimal::new(25, 4) // 0.25%
}

fn default_fee_okx() -> Decimal {
    Decimal::new(5, 4) // 0.05%
}

fn default_fee_gate() -> Decimal {
    Decimal::new(5, 4) // 0.05%
}

impl Config {
    /// Load configuration from the optional config file and environment.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit config file path; the default path is optional,
    /// an explicit one must exist.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::with_name(p).required(true),
            None => config::File::with_name("config").required(false),
        };
        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::default().separator("__").prefix("KIMP"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values; errors here abort startup.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.strategy.slice_notional_krw > Decimal::ZERO,
            "slice_notional_krw must be positive"
        );
        anyhow::ensure!(
            self.strategy.per_symbol_cap_krw >= self.strategy.slice_notional_krw,
            "per_symbol_cap_krw must hold at least one slice"
        );
        anyhow::ensure!(
            self.strategy.entry_threshold_pct < Decimal::ZERO,
            "entry_threshold_pct must be negative (reverse premium)"
        );
        anyhow::ensure!(
            self.strategy.exit_threshold_pct > self.strategy.entry_threshold_pct,
            "exit_threshold_pct must exceed entry_threshold_pct"
        );
        anyhow::ensure!(
            self.strategy.max_concurrent_symbols >= 1,
            "max_concurrent_symbols must be at least 1"
        );
        anyhow::ensure!(
            !self.venues.enabled.is_empty(),
            "at least one venue must be enabled"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venues: VenuesConfig::default(),
            strategy: StrategyConfig::default(),
            fees: FeesConfig::default(),
            rate_limit_per_second: default_rate_limit(),
            status_interval_secs: default_status_interval(),
        }
    }
}

impl Default for VenuesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_venues(),
            upbit: VenueCredentials::default(),
            bithumb: VenueCredentials::default(),
            okx: VenueCredentials::default(),
            gate: VenueCredentials::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            slice_notional_krw: default_slice_notional(),
            per_symbol_cap_krw: default_per_symbol_cap(),
            entry_threshold_pct: default_entry_threshold(),
            exit_threshold_pct: default_exit_threshold(),
            max_concurrent_symbols: default_max_concurrent(),
            inter_slice_delay_secs: default_inter_slice_delay(),
            symbol_scan_delay_ms: default_symbol_scan_delay(),
            cycle_delay_secs: default_cycle_delay(),
            priority_symbols: default_priority_symbols(),
        }
    }
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            upbit: default_fee_upbit(),
            bithumb: default_fee_bithumb(),
            okx: default_fee_okx(),
            gate: default_fee_gate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_positive_entry_threshold_is_rejected() {
        let mut config = Config::default();
        config.strategy.entry_threshold_pct = dec!(0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cap_below_slice_is_rejected() {
        let mut config = Config::default();
        config.strategy.per_symbol_cap_krw = dec!(5000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_credentials_resolve_to_none() {
        let config = Config::default();
        assert!(config.venues.credentials_for(Venue::Upbit).is_none());
    }
}
