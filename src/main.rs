//! Split-entry premium arbitrage executor entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kimp_arb::config::Config;
use kimp_arb::engine::{PositionBook, PremiumEngine, RateCalculator, SplitEngine};
use kimp_arb::exchange::{build_registry, ExchangeRegistry};

#[derive(Parser)]
#[command(name = "kimp-arb")]
#[command(version, about = "Split-entry reverse-premium arbitrage executor")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify configuration and venue connectivity, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::load_from(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Some(Commands::Check) => check(&config).await,
        None => run(config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Probe every enabled venue and report; fails when either market side is
/// fully dark.
async fn check(config: &Config) -> Result<()> {
    let registry = build_registry(config)?;
    let results = registry.check_connections().await;
    for (venue, ok) in &results {
        info!(%venue, live = ok, "Connectivity");
    }
    anyhow::ensure!(
        ExchangeRegistry::sides_covered(&results),
        "both a domestic and a foreign venue must be reachable"
    );
    info!("All checks passed");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        slice = %config.strategy.slice_notional_krw,
        cap = %config.strategy.per_symbol_cap_krw,
        entry = %config.strategy.entry_threshold_pct,
        exit = %config.strategy.exit_threshold_pct,
        "Starting split-entry arbitrage executor"
    );

    let registry = Arc::new(build_registry(&config)?);

    let results = registry.check_connections().await;
    if !ExchangeRegistry::sides_covered(&results) {
        error!("Startup aborted, a market side has no live venue");
        anyhow::bail!("connectivity check failed");
    }

    let rates = Arc::new(RateCalculator::new());
    let premium = Arc::new(PremiumEngine::new(Arc::clone(&registry), rates));
    let positions = Arc::new(PositionBook::new());

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Shutdown signal received, draining open work");
        shutdown_signal.store(true, Ordering::SeqCst);
    });

    spawn_status_loop(
        Arc::clone(&positions),
        Arc::clone(&shutdown),
        config.status_interval_secs,
    );

    let engine = Arc::new(SplitEngine::new(
        registry,
        premium,
        positions,
        config.strategy.clone(),
        config.fees.clone(),
        shutdown,
    ));
    engine.run().await;

    info!("Shutdown complete");
    Ok(())
}

/// Periodic operator-facing position digest.
fn spawn_status_loop(positions: Arc<PositionBook>, shutdown: Arc<AtomicBool>, interval_secs: u64) {
    tokio::spawn(async move {
        while !shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
            let rows = positions.summary().await;
            if rows.is_empty() {
                info!("Status: no open positions");
                continue;
            }
            for row in rows {
                info!(
                    symbol = %row.symbol,
                    slices = row.entry_count,
                    notional_krw = %row.total_notional_krw,
                    avg_premium = %row.avg_entry_premium,
                    foreign = ?row.foreign_venue,
                    "Status"
                );
            }
        }
    });
}
