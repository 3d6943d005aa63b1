//! End-of-day reporting and session health checks.
//!
//! Computed purely from engine state after the close phase: realized
//! performance for the day, and a consistency sweep that surfaces
//! anything the session left behind.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Portfolio, PositionStatus};
use crate::lifecycle::PositionBook;

/// Realized results for one portfolio's session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Portfolio reported on.
    pub portfolio_id: Uuid,
    /// Session date.
    pub trade_date: NaiveDate,
    /// Positions closed during the session.
    pub closed_positions: usize,
    /// Closed positions with positive realized P&L.
    pub wins: usize,
    /// Closed positions with zero or negative realized P&L.
    pub losses: usize,
    /// Wins over closed positions, zero when nothing closed.
    pub win_rate: Decimal,
    /// Sum of realized P&L across the day's closed positions.
    pub realized_pnl: Decimal,
    /// Cash after the session.
    pub cash_balance: Decimal,
}

/// Compute the session summary from the book's closed positions.
#[must_use]
pub fn session_summary(
    portfolio: &Portfolio,
    book: &PositionBook,
    trade_date: NaiveDate,
) -> SessionSummary {
    let closed = book.closed_positions_for(trade_date);
    let mut wins = 0usize;
    let mut losses = 0usize;
    let mut realized_pnl = Decimal::ZERO;

    for position in &closed {
        let pnl = position.realized_pnl().unwrap_or(Decimal::ZERO);
        realized_pnl += pnl;
        if pnl > Decimal::ZERO {
            wins += 1;
        } else {
            losses += 1;
        }
    }

    let win_rate = if closed.is_empty() {
        Decimal::ZERO
    } else {
        Decimal::from(wins as u64) / Decimal::from(closed.len() as u64)
    };

    SessionSummary {
        portfolio_id: portfolio.id,
        trade_date,
        closed_positions: closed.len(),
        wins,
        losses,
        win_rate,
        realized_pnl,
        cash_balance: portfolio.cash_balance,
    }
}

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Nothing left behind.
    Ok,
    /// One or more findings; see the warnings list.
    Warning,
}

/// Findings from the post-session consistency sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Verdict.
    pub status: HealthStatus,
    /// Positions still open while the market is closed.
    pub open_after_hours: usize,
    /// Pending/closing positions with no active order backing them.
    pub stuck_positions: usize,
    /// Cash reservations never settled or released.
    pub unreleased_reservations: usize,
    /// Human-readable findings.
    pub warnings: Vec<String>,
}

/// Sweep the book for anything a completed session should not have left.
///
/// Findings are logged loudly as well as returned; a stuck position or
/// unreleased reservation means cash is tied up with nothing working it.
#[must_use]
pub fn health_check(book: &PositionBook, market_open: bool) -> HealthReport {
    let mut warnings = Vec::new();

    let open_after_hours = if market_open {
        0
    } else {
        book.positions()
            .filter(|p| p.status == PositionStatus::Open)
            .count()
    };
    if open_after_hours > 0 {
        warnings.push(format!(
            "{open_after_hours} positions remain open after market hours"
        ));
    }

    let stuck_positions = book
        .positions()
        .filter(|p| {
            matches!(p.status, PositionStatus::Pending | PositionStatus::Closing)
                && book.active_order_for_position(p.id).is_none()
        })
        .count();
    if stuck_positions > 0 {
        warnings.push(format!(
            "{stuck_positions} positions are pending/closing with no active order"
        ));
    }

    let unreleased_reservations = book.outstanding_reservation_count();
    if unreleased_reservations > 0 {
        warnings.push(format!(
            "{unreleased_reservations} cash reservations were never settled or released"
        ));
    }

    let status = if warnings.is_empty() {
        HealthStatus::Ok
    } else {
        for finding in &warnings {
            warn!(finding = %finding, "session health check finding");
        }
        HealthStatus::Warning
    };

    HealthReport {
        status,
        open_after_hours,
        stuck_positions,
        unreleased_reservations,
        warnings,
    }
}
