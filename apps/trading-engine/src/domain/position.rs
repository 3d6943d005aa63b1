//! Position aggregate and its status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Position lifecycle status.
///
/// `Pending -> Open -> Closing -> Closed`, with `Pending -> Cancelled` for
/// entries that never fill. The simulated executor collapses
/// `Pending -> Open` and `Closing -> Closed` in a single call; the broker
/// executor holds the intermediate states until reconciliation confirms a
/// fill. `Closing -> Open` is the exit-retry path used when an exit order
/// is cancelled or rejected before filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    /// Entry order created, fill not yet confirmed.
    Pending,
    /// Entry filled; the position is live and monitored.
    Open,
    /// Exit order created, fill not yet confirmed.
    Closing,
    /// Exit filled. Terminal.
    Closed,
    /// Entry cancelled before it filled. Terminal.
    Cancelled,
}

impl PositionStatus {
    /// True for terminal states, which are immutable thereafter.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Why a position left the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Stop price was touched.
    Stop,
    /// Target price was touched.
    Target,
    /// Forced end-of-day exit.
    EndOfDay,
    /// Entry never filled and was cancelled.
    Cancelled,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stop => "STOP",
            Self::Target => "TARGET",
            Self::EndOfDay => "EOD",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Validates position status transitions.
pub struct PositionStateMachine;

impl PositionStateMachine {
    /// Check if a status transition is valid.
    #[must_use]
    pub fn is_valid_transition(from: PositionStatus, to: PositionStatus) -> bool {
        matches!(
            (from, to),
            (PositionStatus::Pending, PositionStatus::Open)
                | (PositionStatus::Pending, PositionStatus::Cancelled)
                | (PositionStatus::Open, PositionStatus::Closing)
                | (PositionStatus::Closing, PositionStatus::Closed)
                // Exit order cancelled/rejected before filling: retry later.
                | (PositionStatus::Closing, PositionStatus::Open)
        )
    }

    /// Validate a status transition.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` if the transition is
    /// invalid.
    pub fn validate_transition(
        from: PositionStatus,
        to: PositionStatus,
    ) -> Result<(), EngineError> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(EngineError::InvariantViolation {
                message: format!("invalid position transition {from} -> {to}"),
            })
        }
    }
}

/// One intraday position through its full lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique id.
    pub id: Uuid,
    /// Owning portfolio.
    pub portfolio_id: Uuid,
    /// Symbol traded.
    pub symbol: String,
    /// Session date the position belongs to.
    pub trade_date: NaiveDate,
    /// Actual (or, while pending, expected) entry price per share.
    pub entry_price: Decimal,
    /// Share count.
    pub shares: Decimal,
    /// Protective stop price.
    pub stop_price: Decimal,
    /// Profit target price.
    pub target_price: Decimal,
    /// Fill price of the exit, once closed.
    pub exit_price: Option<Decimal>,
    /// Why the position exited (set when the exit is initiated).
    pub exit_reason: Option<ExitReason>,
    /// Lifecycle status.
    pub status: PositionStatus,
    /// When the entry fill was confirmed.
    pub opened_at: Option<DateTime<Utc>>,
    /// When the exit fill was confirmed.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Create a pending position from an accepted recommendation.
    #[must_use]
    pub fn new_pending(
        portfolio_id: Uuid,
        symbol: impl Into<String>,
        trade_date: NaiveDate,
        entry_price: Decimal,
        shares: Decimal,
        stop_price: Decimal,
        target_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            symbol: symbol.into(),
            trade_date,
            entry_price,
            shares,
            stop_price,
            target_price,
            exit_price: None,
            exit_reason: None,
            status: PositionStatus::Pending,
            opened_at: None,
            closed_at: None,
        }
    }

    /// Realized profit and loss, once closed.
    #[must_use]
    pub fn realized_pnl(&self) -> Option<Decimal> {
        self.exit_price.map(|exit| (exit - self.entry_price) * self.shares)
    }

    /// Confirm the entry fill, transitioning `Pending -> Open`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` if the position is not
    /// pending.
    pub fn mark_open(
        &mut self,
        fill_price: Decimal,
        filled_shares: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        PositionStateMachine::validate_transition(self.status, PositionStatus::Open)?;
        self.entry_price = fill_price;
        self.shares = filled_shares;
        self.opened_at = Some(at);
        self.status = PositionStatus::Open;
        Ok(())
    }

    /// Begin an exit, transitioning `Open -> Closing` and recording the
    /// reason.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` if the position is not
    /// open.
    pub fn mark_closing(&mut self, reason: ExitReason) -> Result<(), EngineError> {
        PositionStateMachine::validate_transition(self.status, PositionStatus::Closing)?;
        self.exit_reason = Some(reason);
        self.status = PositionStatus::Closing;
        Ok(())
    }

    /// Confirm the exit fill, transitioning `Closing -> Closed`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` if the position is not
    /// closing.
    pub fn mark_closed(&mut self, exit_price: Decimal, at: DateTime<Utc>) -> Result<(), EngineError> {
        PositionStateMachine::validate_transition(self.status, PositionStatus::Closed)?;
        self.exit_price = Some(exit_price);
        self.closed_at = Some(at);
        self.status = PositionStatus::Closed;
        Ok(())
    }

    /// Revert a failed exit, transitioning `Closing -> Open`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` if the position is not
    /// closing.
    pub fn revert_to_open(&mut self) -> Result<(), EngineError> {
        PositionStateMachine::validate_transition(self.status, PositionStatus::Open)?;
        self.exit_reason = None;
        self.status = PositionStatus::Open;
        Ok(())
    }

    /// Cancel an unfilled entry, transitioning `Pending -> Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` if the position is not
    /// pending.
    pub fn mark_cancelled(&mut self, at: DateTime<Utc>) -> Result<(), EngineError> {
        PositionStateMachine::validate_transition(self.status, PositionStatus::Cancelled)?;
        self.exit_reason = Some(ExitReason::Cancelled);
        self.closed_at = Some(at);
        self.status = PositionStatus::Cancelled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending_position() -> Position {
        Position::new_pending(
            Uuid::new_v4(),
            "AAPL",
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            dec!(100),
            dec!(10),
            dec!(97),
            dec!(105),
        )
    }

    #[test]
    fn full_lifecycle_transitions() {
        let mut position = pending_position();
        let now = Utc::now();

        position.mark_open(dec!(100.05), dec!(10), now).unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.entry_price, dec!(100.05));

        position.mark_closing(ExitReason::Target).unwrap();
        assert_eq!(position.status, PositionStatus::Closing);

        position.mark_closed(dec!(105), now).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_reason, Some(ExitReason::Target));
        assert_eq!(position.realized_pnl(), Some(dec!(49.50)));
    }

    #[test]
    fn cancel_before_fill() {
        let mut position = pending_position();
        position.mark_cancelled(Utc::now()).unwrap();
        assert_eq!(position.status, PositionStatus::Cancelled);
        assert_eq!(position.exit_reason, Some(ExitReason::Cancelled));
        assert!(position.status.is_terminal());
    }

    #[test]
    fn exit_retry_reverts_to_open() {
        let mut position = pending_position();
        position.mark_open(dec!(100), dec!(10), Utc::now()).unwrap();
        position.mark_closing(ExitReason::Stop).unwrap();

        position.revert_to_open().unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert!(position.exit_reason.is_none());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut position = pending_position();
        position.mark_cancelled(Utc::now()).unwrap();

        let err = position.mark_open(dec!(100), dec!(10), Utc::now());
        assert!(matches!(err, Err(EngineError::InvariantViolation { .. })));
    }

    #[test]
    fn cannot_close_a_pending_position() {
        let mut position = pending_position();
        let err = position.mark_closing(ExitReason::Stop);
        assert!(matches!(err, Err(EngineError::InvariantViolation { .. })));
    }

    #[test]
    fn state_machine_rejects_skipping_states() {
        assert!(!PositionStateMachine::is_valid_transition(
            PositionStatus::Pending,
            PositionStatus::Closed
        ));
        assert!(!PositionStateMachine::is_valid_transition(
            PositionStatus::Open,
            PositionStatus::Cancelled
        ));
        assert!(PositionStateMachine::is_valid_transition(
            PositionStatus::Closing,
            PositionStatus::Open
        ));
    }
}
