//! In-memory book of positions, orders, and cash reservations for one
//! portfolio.
//!
//! The book is the engine's working state; durable account state (cash,
//! holdings, transactions) lives behind the ledger port. Historical
//! positions and orders are retained for audit after they reach terminal
//! states.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::{BrokerOrder, Position, PositionStatus};

/// Working state for one portfolio's positions and orders.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<Uuid, Position>,
    orders: HashMap<Uuid, BrokerOrder>,
    /// Outstanding cash reservation per position, until settled/released.
    reservations: HashMap<Uuid, Uuid>,
}

impl PositionBook {
    /// Empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new position.
    pub fn insert_position(&mut self, position: Position) {
        self.positions.insert(position.id, position);
    }

    /// Get a position by id.
    #[must_use]
    pub fn position(&self, id: Uuid) -> Option<&Position> {
        self.positions.get(&id)
    }

    /// Get a mutable position by id.
    pub fn position_mut(&mut self, id: Uuid) -> Option<&mut Position> {
        self.positions.get_mut(&id)
    }

    /// All positions, in no particular order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Ids of open positions, sorted by symbol for deterministic iteration.
    #[must_use]
    pub fn open_position_ids(&self) -> Vec<Uuid> {
        let mut open: Vec<&Position> = self
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .collect();
        open.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        open.iter().map(|p| p.id).collect()
    }

    /// Count of positions currently open or on their way in/out.
    #[must_use]
    pub fn active_position_count(&self) -> usize {
        self.positions
            .values()
            .filter(|p| !p.status.is_terminal())
            .count()
    }

    /// Symbols with a non-terminal position for the trade date.
    ///
    /// Used to enforce the one-active-position-per-symbol-per-day
    /// invariant and to filter sizing candidates.
    #[must_use]
    pub fn held_symbols(&self, trade_date: NaiveDate) -> BTreeSet<String> {
        self.positions
            .values()
            .filter(|p| p.trade_date == trade_date && !p.status.is_terminal())
            .map(|p| p.symbol.clone())
            .collect()
    }

    /// True if the symbol already has a non-terminal position that day.
    #[must_use]
    pub fn has_active_position(&self, symbol: &str, trade_date: NaiveDate) -> bool {
        self.positions.values().any(|p| {
            p.symbol == symbol && p.trade_date == trade_date && !p.status.is_terminal()
        })
    }

    /// True if any position (any status) exists for the trade date.
    #[must_use]
    pub fn has_positions_for(&self, trade_date: NaiveDate) -> bool {
        self.positions.values().any(|p| p.trade_date == trade_date)
    }

    /// Closed positions for the trade date, sorted by symbol.
    #[must_use]
    pub fn closed_positions_for(&self, trade_date: NaiveDate) -> Vec<&Position> {
        let mut closed: Vec<&Position> = self
            .positions
            .values()
            .filter(|p| p.trade_date == trade_date && p.status == PositionStatus::Closed)
            .collect();
        closed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        closed
    }

    /// Insert a new order.
    pub fn insert_order(&mut self, order: BrokerOrder) {
        self.orders.insert(order.id, order);
    }

    /// Get an order by id.
    #[must_use]
    pub fn order(&self, id: Uuid) -> Option<&BrokerOrder> {
        self.orders.get(&id)
    }

    /// Get a mutable order by id.
    pub fn order_mut(&mut self, id: Uuid) -> Option<&mut BrokerOrder> {
        self.orders.get_mut(&id)
    }

    /// Ids of orders the reconciliation loop must poll, sorted by
    /// submission time for deterministic processing.
    #[must_use]
    pub fn active_order_ids(&self) -> Vec<Uuid> {
        let mut active: Vec<&BrokerOrder> = self
            .orders
            .values()
            .filter(|o| o.status.is_active())
            .collect();
        active.sort_by_key(|o| (o.submitted_at, o.client_order_id.clone()));
        active.iter().map(|o| o.id).collect()
    }

    /// The active order for a position, if any.
    #[must_use]
    pub fn active_order_for_position(&self, position_id: Uuid) -> Option<&BrokerOrder> {
        self.orders
            .values()
            .find(|o| o.position_id == position_id && o.status.is_active())
    }

    /// Record an outstanding cash reservation for a position.
    pub fn set_reservation(&mut self, position_id: Uuid, reservation_id: Uuid) {
        self.reservations.insert(position_id, reservation_id);
    }

    /// Take (and clear) the outstanding reservation for a position.
    pub fn take_reservation(&mut self, position_id: Uuid) -> Option<Uuid> {
        self.reservations.remove(&position_id)
    }

    /// Count of reservations not yet settled or released.
    #[must_use]
    pub fn outstanding_reservation_count(&self) -> usize {
        self.reservations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::domain::OrderAction;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn position(symbol: &str) -> Position {
        Position::new_pending(
            Uuid::new_v4(),
            symbol,
            date(),
            dec!(100),
            dec!(10),
            dec!(97),
            dec!(105),
        )
    }

    #[test]
    fn held_symbols_tracks_non_terminal_positions() {
        let mut book = PositionBook::new();

        let pending = position("AAPL");
        let mut cancelled = position("MSFT");
        cancelled.mark_cancelled(Utc::now()).unwrap();

        book.insert_position(pending);
        book.insert_position(cancelled);

        let held = book.held_symbols(date());
        assert!(held.contains("AAPL"));
        assert!(!held.contains("MSFT"));
        assert!(book.has_active_position("AAPL", date()));
        assert!(!book.has_active_position("AAPL", date() + chrono::Days::new(1)));
    }

    #[test]
    fn open_position_ids_sorted_by_symbol() {
        let mut book = PositionBook::new();
        for symbol in ["MSFT", "AAPL", "NVDA"] {
            let mut p = position(symbol);
            p.mark_open(dec!(100), dec!(10), Utc::now()).unwrap();
            book.insert_position(p);
        }

        let symbols: Vec<String> = book
            .open_position_ids()
            .iter()
            .map(|id| book.position(*id).unwrap().symbol.clone())
            .collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "NVDA"]);
    }

    #[test]
    fn active_orders_exclude_terminal() {
        let mut book = PositionBook::new();
        let position_id = Uuid::new_v4();

        let active = BrokerOrder::new(position_id, OrderAction::Buy, dec!(10), Utc::now());
        let mut done = BrokerOrder::new(position_id, OrderAction::Buy, dec!(10), Utc::now());
        done.status = crate::domain::OrderStatus::Filled;

        let active_id = active.id;
        book.insert_order(active);
        book.insert_order(done);

        assert_eq!(book.active_order_ids(), vec![active_id]);
        assert!(book.active_order_for_position(position_id).is_some());
    }

    #[test]
    fn reservations_are_taken_once() {
        let mut book = PositionBook::new();
        let position_id = Uuid::new_v4();
        let reservation_id = Uuid::new_v4();

        book.set_reservation(position_id, reservation_id);
        assert_eq!(book.outstanding_reservation_count(), 1);
        assert_eq!(book.take_reservation(position_id), Some(reservation_id));
        assert_eq!(book.take_reservation(position_id), None);
        assert_eq!(book.outstanding_reservation_count(), 0);
    }
}
