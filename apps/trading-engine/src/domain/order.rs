//! Broker order aggregate and its status state machine.
//!
//! Orders exist only on the broker execution path. One position has at
//! most one active order at a time; historical orders are retained for
//! audit. The `client_order_id` is the idempotency key: status lookups and
//! cancels go through it, and it is never reused for a resubmission.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAction {
    /// Buy to open.
    Buy,
    /// Sell to close.
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Broker order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created locally, submission not yet acknowledged.
    Pending,
    /// Acknowledged by the gateway, working.
    Submitted,
    /// Some quantity filled, remainder working.
    PartiallyFilled,
    /// Fully filled. Terminal.
    Filled,
    /// Cancelled before completing. Terminal.
    Cancelled,
    /// Rejected by the broker. Terminal.
    Rejected,
}

impl OrderStatus {
    /// True for terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// True for states the reconciliation loop must poll.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// Validates order status transitions.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Check if a status transition is valid.
    #[must_use]
    pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
        matches!(
            (from, to),
            (OrderStatus::Pending, OrderStatus::Submitted)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Pending, OrderStatus::Rejected)
                | (OrderStatus::Submitted, OrderStatus::PartiallyFilled)
                | (OrderStatus::Submitted, OrderStatus::Filled)
                | (OrderStatus::Submitted, OrderStatus::Cancelled)
                | (OrderStatus::Submitted, OrderStatus::Rejected)
                | (OrderStatus::PartiallyFilled, OrderStatus::PartiallyFilled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Filled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Cancelled)
        )
    }

    /// Validate a status transition.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` if the transition is
    /// invalid.
    pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), EngineError> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(EngineError::InvariantViolation {
                message: format!("invalid order transition {from} -> {to}"),
            })
        }
    }
}

/// One market order submitted through the broker gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    /// Unique id.
    pub id: Uuid,
    /// Position this order opens or closes.
    pub position_id: Uuid,
    /// Client-generated idempotency key, unique across all orders.
    pub client_order_id: String,
    /// Buy or sell.
    pub action: OrderAction,
    /// Quantity requested.
    pub requested_quantity: Decimal,
    /// Cumulative quantity filled so far.
    pub filled_quantity: Decimal,
    /// Volume-weighted average fill price, once any fill arrives.
    pub filled_price: Option<Decimal>,
    /// Cumulative commission reported by the broker.
    pub commission: Decimal,
    /// Status state machine.
    pub status: OrderStatus,
    /// When the order was created/submitted.
    pub submitted_at: DateTime<Utc>,
    /// Last error reported for this order, if any.
    pub error_message: Option<String>,
}

impl BrokerOrder {
    /// Create a new order for a position.
    #[must_use]
    pub fn new(
        position_id: Uuid,
        action: OrderAction,
        requested_quantity: Decimal,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            position_id,
            client_order_id: Uuid::new_v4().to_string(),
            action,
            requested_quantity,
            filled_quantity: Decimal::ZERO,
            filled_price: None,
            commission: Decimal::ZERO,
            status: OrderStatus::Pending,
            submitted_at,
            error_message: None,
        }
    }

    /// Quantity still working at the broker.
    #[must_use]
    pub fn remaining_quantity(&self) -> Decimal {
        self.requested_quantity - self.filled_quantity
    }

    /// Apply a cumulative fill snapshot from the broker.
    ///
    /// `cumulative_quantity` is the broker's total filled quantity so far
    /// (not a delta); repeated snapshots with the same quantity are no-ops,
    /// which is what makes reconciliation idempotent. The order moves to
    /// `PartiallyFilled` or `Filled` according to the remaining quantity.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` if the snapshot shrinks
    /// the filled quantity, overfills the order, or arrives in a terminal
    /// state.
    pub fn apply_fill(
        &mut self,
        cumulative_quantity: Decimal,
        avg_price: Decimal,
        commission: Decimal,
    ) -> Result<(), EngineError> {
        if cumulative_quantity < self.filled_quantity {
            return Err(EngineError::InvariantViolation {
                message: format!(
                    "order {}: fill snapshot {cumulative_quantity} below recorded {}",
                    self.client_order_id, self.filled_quantity
                ),
            });
        }
        if cumulative_quantity > self.requested_quantity {
            return Err(EngineError::InvariantViolation {
                message: format!(
                    "order {}: fill snapshot {cumulative_quantity} exceeds requested {}",
                    self.client_order_id, self.requested_quantity
                ),
            });
        }
        if cumulative_quantity == self.filled_quantity {
            return Ok(());
        }

        let to = if cumulative_quantity == self.requested_quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        OrderStateMachine::validate_transition(self.status, to)?;

        self.filled_quantity = cumulative_quantity;
        self.filled_price = Some(avg_price);
        self.commission = commission;
        self.status = to;
        Ok(())
    }

    /// Age of the order relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.submitted_at
    }

    /// True when the order should be cancelled for staleness: past the
    /// timeout, still non-terminal, and nothing filled yet. Orders with
    /// partial fills are exempt and left to complete or be cancelled
    /// explicitly.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.status.is_active()
            && self.filled_quantity == Decimal::ZERO
            && self.age(now) > timeout
    }
}
