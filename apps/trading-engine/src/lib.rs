// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Trading Engine - Rust Core Library
//!
//! Deterministic decision and execution engine for short-horizon equity
//! trading: sizes risk-bounded positions from per-symbol predictions,
//! tracks each position through a strict lifecycle (simulated or
//! asynchronous broker fills), reconciles broker state back into the
//! ledger, and replays the identical sizing/exit logic against
//! historical bars.
//!
//! # Architecture (layers, inside -> outside)
//!
//! - **Domain**: validated data model and state machines
//!   - `domain`: portfolio, holding, prediction, recommendation,
//!     position and order aggregates
//! - **Decision & execution**:
//!   - `sizing`: pure recommendation builder shared by live and backtest
//!   - `lifecycle`: position lifecycle manager and both executors
//!   - `reconcile`: broker order reconciliation loop
//!   - `scheduler`: daily phase coordination per portfolio
//!   - `backtest`: historical replay harness over the same code paths
//!   - `report`: end-of-day summary and health sweep
//! - **Ports**: interfaces for external collaborators
//!   - `ports`: `Predictor`, `MarketData`, `Ledger`, `BrokerGateway`
//! - **Infrastructure**: in-memory adapters for tests and simulated
//!   deployments

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod backtest;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod lifecycle;
pub mod ports;
pub mod reconcile;
pub mod report;
pub mod scheduler;
pub mod sizing;
pub mod telemetry;

// Domain re-exports
pub use domain::{
    BrokerOrder, ExecutionMode, ExitReason, Holding, OrderAction, OrderStatus, Portfolio,
    PortfolioSettings, Position, PositionStatus, PredictionInput, Recommendation,
};
pub use error::EngineError;

// Engine re-exports
pub use backtest::{BacktestConfig, BacktestRun, BacktestRunner};
pub use config::EngineConfig;
pub use lifecycle::{CommissionSchedule, LifecycleManager, MonitorAction};
pub use reconcile::{ReconcileReport, Reconciler};
pub use scheduler::{PhaseReport, PortfolioRuntime, SessionScheduler};
pub use sizing::build_recommendations;

// Port re-exports
pub use ports::{BrokerGateway, Ledger, MarketData, Predictor};
