//! Infrastructure layer - in-memory adapters.
//!
//! These back the ports for tests and simulated deployments. Production
//! adapters (a SQL-backed ledger, a real broker client) live outside the
//! crate and implement the same ports.

mod memory_ledger;
mod mock_gateway;
mod static_data;

pub use memory_ledger::{InMemoryLedger, LedgerTransaction};
pub use mock_gateway::{FillScript, MockBrokerGateway};
pub use static_data::{StaticMarketData, StaticPredictor};
