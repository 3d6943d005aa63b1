//! Trading Engine Binary
//!
//! Starts the scheduler daemon over a simulated deployment: in-memory
//! ledger, static market data, and (for paper broker mode) the mock
//! gateway. Production deployments swap in real port adapters.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trading-engine
//! ```
//!
//! # Environment Variables
//!
//! - `PORTFOLIO_CASH`: starting cash (default: 100000)
//! - `WATCHLIST`: comma-separated symbols (default: AAPL,MSFT,NVDA)
//! - `EXECUTION_MODE`: SIMULATED | PAPER (default: SIMULATED)
//! - `RUST_LOG`: log level (default: info)
//!
//! Plus the engine cadence variables documented in `config`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use trading_engine::domain::{BrokerConfig, ExecutionMode, PortfolioSettings};
use trading_engine::infrastructure::{
    InMemoryLedger, MockBrokerGateway, StaticMarketData, StaticPredictor,
};
use trading_engine::lifecycle::CommissionSchedule;
use trading_engine::scheduler::PortfolioRuntime;
use trading_engine::telemetry::init_telemetry;
use trading_engine::{
    EngineConfig, LifecycleManager, Portfolio, SessionScheduler,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn execution_mode_from_env() -> anyhow::Result<ExecutionMode> {
    match std::env::var("EXECUTION_MODE").as_deref() {
        Ok("PAPER") => Ok(ExecutionMode::Broker),
        Ok("SIMULATED") | Err(_) => Ok(ExecutionMode::Simulated),
        Ok(other) => anyhow::bail!("unsupported EXECUTION_MODE: {other}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    let config = EngineConfig::from_env().context("engine configuration")?;
    let mode = execution_mode_from_env()?;

    let cash: Decimal = std::env::var("PORTFOLIO_CASH")
        .unwrap_or_else(|_| "100000".to_string())
        .parse()
        .context("PORTFOLIO_CASH must be a decimal")?;
    let watchlist: Vec<String> = std::env::var("WATCHLIST")
        .unwrap_or_else(|_| "AAPL,MSFT,NVDA".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let settings = PortfolioSettings {
        execution_mode: mode,
        broker: (mode == ExecutionMode::Broker).then(|| BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: 7497,
            account: "PAPER".to_string(),
            client_id: 1,
            paper: true,
        }),
        watchlist,
        ..PortfolioSettings::default()
    };
    let portfolio = Portfolio::new("default", cash, settings);

    let ledger = Arc::new(InMemoryLedger::new());
    ledger.open_account(portfolio.id, cash);
    let gateway = (mode == ExecutionMode::Broker).then(|| Arc::new(MockBrokerGateway::new()));

    let predictor = Arc::new(StaticPredictor::new());
    let market = Arc::new(StaticMarketData::new());
    market.set_market_open(true);

    let manager = LifecycleManager::new(
        Arc::clone(&ledger),
        gateway,
        mode,
        config.slippage_fraction(),
        CommissionSchedule::default(),
        config.call_timeout,
    )?;
    let runtime = PortfolioRuntime::new(portfolio, manager)?;

    let mut scheduler = SessionScheduler::new(predictor, market, config);
    scheduler.add_portfolio(runtime);

    info!(mode = ?mode, cash = %cash, "trading engine starting");

    let shutdown = CancellationToken::new();
    let scheduler_handle = tokio::spawn(Arc::new(scheduler).run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    shutdown.cancel();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler_handle)
        .await
        .is_err()
    {
        tracing::warn!("scheduler did not stop within the shutdown timeout");
    }

    info!("trading engine stopped");
    Ok(())
}
