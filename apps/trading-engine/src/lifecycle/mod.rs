//! Position lifecycle management.
//!
//! Owns the position state machine and mediates between recommendations,
//! the ledger, and the execution path: a simulated executor that fills
//! synchronously with modeled slippage, or a broker executor that submits
//! through the gateway and waits for the reconciliation loop to confirm
//! fills.

mod book;
mod commission;
mod manager;

pub use book::PositionBook;
pub use commission::CommissionSchedule;
pub use manager::{CloseAllReport, FillOutcome, LifecycleManager, MonitorAction};
