//! Structured phase reports.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::report::SessionSummary;

/// Which daily phase a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseKind {
    /// Morning entry phase.
    Open,
    /// Intraday stop/target monitoring.
    Monitor,
    /// End-of-session forced exit.
    Close,
}

/// Per-symbol outcome within a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolOutcome {
    /// Symbol acted on.
    pub symbol: String,
    /// What happened ("opened", "pending", "stop", "target", "held", ...).
    pub outcome: String,
}

/// Structured result of one phase run for one portfolio.
///
/// Phases never panic on a single-symbol failure; everything that went
/// wrong is collected here instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Phase covered.
    pub phase: PhaseKind,
    /// Portfolio the phase ran for.
    pub portfolio_id: Uuid,
    /// Positions opened or exits triggered.
    pub executed: usize,
    /// Items skipped with their reasons (symbol or "portfolio").
    pub skipped: Vec<(String, String)>,
    /// Per-symbol outcomes, in processing order.
    pub outcomes: Vec<SymbolOutcome>,
    /// Isolated per-symbol errors.
    pub errors: Vec<String>,
    /// True when a ledger failure halted the phase for this portfolio.
    pub halted: bool,
    /// Session summary, attached by the close phase.
    pub summary: Option<SessionSummary>,
}

impl PhaseReport {
    /// Empty report.
    #[must_use]
    pub const fn new(phase: PhaseKind, portfolio_id: Uuid) -> Self {
        Self {
            phase,
            portfolio_id,
            executed: 0,
            skipped: Vec::new(),
            outcomes: Vec::new(),
            errors: Vec::new(),
            halted: false,
            summary: None,
        }
    }

    /// Record a skipped item.
    pub fn skip(&mut self, subject: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push((subject.into(), reason.into()));
    }

    /// Record a per-symbol outcome.
    pub fn outcome(&mut self, symbol: impl Into<String>, outcome: impl Into<String>) {
        self.outcomes.push(SymbolOutcome {
            symbol: symbol.into(),
            outcome: outcome.into(),
        });
    }
}
