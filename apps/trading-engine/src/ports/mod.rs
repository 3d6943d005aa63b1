//! Ports - interfaces for the four external collaborators.
//!
//! The engine owns these contracts; adapters (real or in-memory) live in
//! `infrastructure` or outside the crate entirely:
//!
//! - `predictor`: opaque statistical model producing per-symbol-day output
//! - `market_data`: live quotes, historical bars, market-hours calendar
//! - `ledger`: transactional store of cash, reservations, and holdings
//! - `broker`: order submission/status/cancel against a brokerage

pub mod broker;
pub mod ledger;
pub mod market_data;
pub mod predictor;

pub use broker::{BrokerGateway, BrokerGatewayError, GatewayOrderStatus, OrderStatusReport};
pub use ledger::{Ledger, LedgerError, TransactionKind};
pub use market_data::{Bar, MarketData, MarketDataError, Quote};
pub use predictor::{Predictor, PredictorError};
