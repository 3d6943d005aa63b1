//! Domain layer - core data model with validated construction.
//!
//! - `portfolio`: accounts, settings, holdings
//! - `prediction`: raw per-symbol model output
//! - `recommendation`: risk-bounded trade candidates
//! - `position`: position aggregate and its status state machine
//! - `order`: broker order aggregate and its status state machine

pub mod order;
pub mod portfolio;
pub mod position;
pub mod prediction;
pub mod recommendation;

pub use order::{BrokerOrder, OrderAction, OrderStateMachine, OrderStatus};
pub use portfolio::{BrokerConfig, ExecutionMode, Holding, Portfolio, PortfolioSettings};
pub use position::{ExitReason, Position, PositionStateMachine, PositionStatus};
pub use prediction::PredictionInput;
pub use recommendation::Recommendation;
