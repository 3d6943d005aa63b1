//! In-memory transactional ledger.
//!
//! Every port method takes the account lock once, so each operation is
//! atomic with respect to every other: a committed transaction settles
//! its reservation, moves cash, and adjusts the holding in one step.
//! Holdings are derived purely from committed transactions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::Holding;
use crate::ports::ledger::{Ledger, LedgerError, TransactionKind};

/// One committed journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    /// Buy or sell.
    pub kind: TransactionKind,
    /// Symbol traded.
    pub symbol: String,
    /// Quantity filled.
    pub quantity: Decimal,
    /// Fill price per share.
    pub price: Decimal,
    /// Commission charged.
    pub commission: Decimal,
}

#[derive(Debug, Default)]
struct AccountState {
    /// Gross cash, including reserved amounts.
    cash: Decimal,
    /// Outstanding reservations by id.
    reservations: HashMap<Uuid, Decimal>,
    /// Holdings by symbol.
    holdings: HashMap<String, Holding>,
    /// Committed transaction journal.
    journal: Vec<LedgerTransaction>,
}

impl AccountState {
    fn reserved(&self) -> Decimal {
        self.reservations.values().copied().sum()
    }

    fn spendable(&self) -> Decimal {
        self.cash - self.reserved()
    }
}

/// In-memory implementation of the ledger port.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: Mutex<HashMap<Uuid, AccountState>>,
}

impl InMemoryLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account with starting cash.
    pub fn open_account(&self, portfolio_id: Uuid, cash: Decimal) {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.insert(
            portfolio_id,
            AccountState {
                cash,
                ..AccountState::default()
            },
        );
    }

    /// Number of committed transactions for an account. Used to verify
    /// reconciliation idempotence in tests.
    #[must_use]
    pub fn transaction_count(&self, portfolio_id: Uuid) -> usize {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.get(&portfolio_id).map_or(0, |a| a.journal.len())
    }

    /// Total outstanding reserved cash for an account.
    #[must_use]
    pub fn reserved_total(&self, portfolio_id: Uuid) -> Decimal {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.get(&portfolio_id).map_or(Decimal::ZERO, AccountState::reserved)
    }

    /// Committed transaction journal for an account.
    #[must_use]
    pub fn transactions_for(&self, portfolio_id: Uuid) -> Vec<LedgerTransaction> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(&portfolio_id)
            .map_or_else(Vec::new, |a| a.journal.clone())
    }

    /// Synchronous holdings snapshot for assertions.
    #[must_use]
    pub fn holdings_for(&self, portfolio_id: Uuid) -> Vec<Holding> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.get(&portfolio_id).map_or_else(Vec::new, |a| {
            let mut holdings: Vec<Holding> = a.holdings.values().cloned().collect();
            holdings.sort_by(|x, y| x.symbol.cmp(&y.symbol));
            holdings
        })
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn reserve_cash(
        &self,
        portfolio_id: Uuid,
        amount: Decimal,
    ) -> Result<Uuid, LedgerError> {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let account = accounts
            .get_mut(&portfolio_id)
            .ok_or(LedgerError::PortfolioNotFound { id: portfolio_id })?;

        let spendable = account.spendable();
        if amount > spendable {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: spendable,
            });
        }
        let reservation_id = Uuid::new_v4();
        account.reservations.insert(reservation_id, amount);
        Ok(reservation_id)
    }

    async fn release_reservation(&self, reservation_id: Uuid) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        for account in accounts.values_mut() {
            if account.reservations.remove(&reservation_id).is_some() {
                return Ok(());
            }
        }
        Err(LedgerError::ReservationNotFound { id: reservation_id })
    }

    async fn commit_transaction(
        &self,
        portfolio_id: Uuid,
        kind: TransactionKind,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        reservation_id: Option<Uuid>,
    ) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let account = accounts
            .get_mut(&portfolio_id)
            .ok_or(LedgerError::PortfolioNotFound { id: portfolio_id })?;

        // Settle the reservation first so the cash it held is usable for
        // the actual cost.
        if let Some(id) = reservation_id {
            account
                .reservations
                .remove(&id)
                .ok_or(LedgerError::ReservationNotFound { id })?;
        }

        match kind {
            TransactionKind::Buy => {
                let cost = quantity * price + commission;
                let spendable = account.spendable();
                if cost > spendable {
                    // Re-reserve nothing; the caller decides how to unwind.
                    return Err(LedgerError::InsufficientFunds {
                        requested: cost,
                        available: spendable,
                    });
                }
                account.cash -= cost;

                let holding = account.holdings.entry(symbol.to_string()).or_insert(Holding {
                    portfolio_id,
                    symbol: symbol.to_string(),
                    quantity: Decimal::ZERO,
                    average_cost: Decimal::ZERO,
                });
                let total_cost = holding.average_cost * holding.quantity + price * quantity;
                holding.quantity += quantity;
                if holding.quantity > Decimal::ZERO {
                    holding.average_cost = total_cost / holding.quantity;
                }
            }
            TransactionKind::Sell => {
                let held = account
                    .holdings
                    .get(symbol)
                    .map_or(Decimal::ZERO, |h| h.quantity);
                if quantity > held {
                    return Err(LedgerError::HoldingUnderflow {
                        symbol: symbol.to_string(),
                        requested: quantity,
                        held,
                    });
                }
                account.cash += quantity * price - commission;

                let remaining = account.holdings.get_mut(symbol).map(|holding| {
                    holding.quantity -= quantity;
                    holding.quantity
                });
                if remaining == Some(Decimal::ZERO) {
                    account.holdings.remove(symbol);
                }
            }
        }

        account.journal.push(LedgerTransaction {
            kind,
            symbol: symbol.to_string(),
            quantity,
            price,
            commission,
        });
        Ok(())
    }

    async fn cash_balance(&self, portfolio_id: Uuid) -> Result<Decimal, LedgerError> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(&portfolio_id)
            .map(AccountState::spendable)
            .ok_or(LedgerError::PortfolioNotFound { id: portfolio_id })
    }

    async fn holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>, LedgerError> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(&portfolio_id)
            .map(|a| {
                let mut holdings: Vec<Holding> = a.holdings.values().cloned().collect();
                holdings.sort_by(|x, y| x.symbol.cmp(&y.symbol));
                holdings
            })
            .ok_or(LedgerError::PortfolioNotFound { id: portfolio_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account() -> (InMemoryLedger, Uuid) {
        let ledger = InMemoryLedger::new();
        let id = Uuid::new_v4();
        ledger.open_account(id, dec!(10000));
        (ledger, id)
    }

    #[tokio::test]
    async fn reservations_reduce_spendable_cash() {
        let (ledger, id) = account();

        let reservation = ledger.reserve_cash(id, dec!(4000)).await.unwrap();
        assert_eq!(ledger.cash_balance(id).await.unwrap(), dec!(6000));

        ledger.release_reservation(reservation).await.unwrap();
        assert_eq!(ledger.cash_balance(id).await.unwrap(), dec!(10000));
    }

    #[tokio::test]
    async fn over_reservation_is_rejected() {
        let (ledger, id) = account();
        ledger.reserve_cash(id, dec!(9000)).await.unwrap();

        let err = ledger.reserve_cash(id, dec!(2000)).await;
        assert!(matches!(err, Err(LedgerError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn buy_commit_settles_reservation_and_builds_holding() {
        let (ledger, id) = account();
        let reservation = ledger.reserve_cash(id, dec!(1001)).await.unwrap();

        ledger
            .commit_transaction(
                id,
                TransactionKind::Buy,
                "AAPL",
                dec!(10),
                dec!(100),
                dec!(0.035),
                Some(reservation),
            )
            .await
            .unwrap();

        assert_eq!(ledger.cash_balance(id).await.unwrap(), dec!(8999.965));
        let holdings = ledger.holdings(id).await.unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].quantity, dec!(10));
        assert_eq!(holdings[0].average_cost, dec!(100));
        assert_eq!(ledger.reserved_total(id), Decimal::ZERO);
    }

    #[tokio::test]
    async fn buy_commits_average_cost_across_fills() {
        let (ledger, id) = account();
        ledger
            .commit_transaction(id, TransactionKind::Buy, "AAPL", dec!(10), dec!(100), Decimal::ZERO, None)
            .await
            .unwrap();
        ledger
            .commit_transaction(id, TransactionKind::Buy, "AAPL", dec!(10), dec!(110), Decimal::ZERO, None)
            .await
            .unwrap();

        let holdings = ledger.holdings(id).await.unwrap();
        assert_eq!(holdings[0].quantity, dec!(20));
        assert_eq!(holdings[0].average_cost, dec!(105));
    }

    #[tokio::test]
    async fn sell_deletes_holding_at_zero() {
        let (ledger, id) = account();
        ledger
            .commit_transaction(id, TransactionKind::Buy, "AAPL", dec!(10), dec!(100), Decimal::ZERO, None)
            .await
            .unwrap();
        ledger
            .commit_transaction(id, TransactionKind::Sell, "AAPL", dec!(10), dec!(105), Decimal::ZERO, None)
            .await
            .unwrap();

        assert!(ledger.holdings(id).await.unwrap().is_empty());
        assert_eq!(ledger.cash_balance(id).await.unwrap(), dec!(10050));
    }

    #[tokio::test]
    async fn sell_underflow_is_rejected() {
        let (ledger, id) = account();
        let err = ledger
            .commit_transaction(id, TransactionKind::Sell, "AAPL", dec!(1), dec!(100), Decimal::ZERO, None)
            .await;
        assert!(matches!(err, Err(LedgerError::HoldingUnderflow { .. })));
        assert_eq!(ledger.transaction_count(id), 0);
    }

    #[tokio::test]
    async fn unknown_portfolio_is_an_error() {
        let ledger = InMemoryLedger::new();
        let err = ledger.cash_balance(Uuid::new_v4()).await;
        assert!(matches!(err, Err(LedgerError::PortfolioNotFound { .. })));
    }
}
