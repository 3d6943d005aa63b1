//! Reconciliation tick report.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome counts for one reconciliation pass over a portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Portfolio reconciled.
    pub portfolio_id: Uuid,
    /// Active orders polled.
    pub checked: usize,
    /// Orders that completed and settled this pass.
    pub filled: usize,
    /// Orders that advanced a partial fill.
    pub partially_filled: usize,
    /// Orders cancelled (broker-side or for staleness).
    pub cancelled: usize,
    /// Orders rejected by the broker.
    pub rejected: usize,
    /// Per-order errors, retried next tick.
    pub errors: Vec<String>,
}

impl ReconcileReport {
    /// Empty report for a portfolio.
    #[must_use]
    pub const fn new(portfolio_id: Uuid) -> Self {
        Self {
            portfolio_id,
            checked: 0,
            filled: 0,
            partially_filled: 0,
            cancelled: 0,
            rejected: 0,
            errors: Vec::new(),
        }
    }

    /// True when the pass completed without errors.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
