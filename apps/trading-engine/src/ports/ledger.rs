//! Ledger port (driven port).
//!
//! Transactional store of cash balances, cash reservations, holdings, and
//! the transaction journal. Every operation is atomic: a committed
//! transaction settles its reservation, moves cash, and adjusts the
//! holding in one step, or not at all. Holdings are never written
//! directly; they are derived from committed transactions.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::Holding;

/// Ledger transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Cash out, shares in.
    Buy,
    /// Shares out, cash in.
    Sell,
}

/// Ledger port error.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Not enough unreserved cash for the reservation or purchase.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Amount requested.
        requested: Decimal,
        /// Unreserved cash available.
        available: Decimal,
    },

    /// Reservation id is unknown or already settled.
    #[error("reservation not found: {id}")]
    ReservationNotFound {
        /// The missing reservation id.
        id: Uuid,
    },

    /// A sell would take a holding below zero.
    #[error("holding underflow for {symbol}: selling {requested}, held {held}")]
    HoldingUnderflow {
        /// Symbol being sold.
        symbol: String,
        /// Quantity requested.
        requested: Decimal,
        /// Quantity actually held.
        held: Decimal,
    },

    /// Unknown portfolio.
    #[error("portfolio not found: {id}")]
    PortfolioNotFound {
        /// The missing portfolio id.
        id: Uuid,
    },

    /// Backing store failure; state may be ambiguous.
    #[error("ledger storage failure: {message}")]
    Storage {
        /// Error details.
        message: String,
    },
}

/// Port for the transactional account store.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Reserve cash ahead of an order submission, returning a reservation
    /// id. Reserved cash is excluded from `cash_balance` until the
    /// reservation is settled by a commit or released.
    async fn reserve_cash(&self, portfolio_id: Uuid, amount: Decimal)
    -> Result<Uuid, LedgerError>;

    /// Release an unsettled reservation (cancelled or rejected order).
    async fn release_reservation(&self, reservation_id: Uuid) -> Result<(), LedgerError>;

    /// Commit a filled transaction atomically: settle the reservation (if
    /// any), move cash by `quantity * price +/- commission`, and adjust
    /// the holding.
    #[allow(clippy::too_many_arguments)]
    async fn commit_transaction(
        &self,
        portfolio_id: Uuid,
        kind: TransactionKind,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        reservation_id: Option<Uuid>,
    ) -> Result<(), LedgerError>;

    /// Spendable (unreserved) cash for a portfolio.
    async fn cash_balance(&self, portfolio_id: Uuid) -> Result<Decimal, LedgerError>;

    /// Current holdings for a portfolio.
    async fn holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>, LedgerError>;
}
