//! Position book

use super::types::{
    CloseConfirmation, ClosedPosition, LedgerError, OpenConfirmation, Position, PositionId,
    PriceUpdate, Side,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// P&L totals derived from the ledger in one pass
///
/// Unrealized P&L is re-derived from the open marks on every
/// evaluation; realized P&L folds into a running total at close time
/// so cost and memory stay flat over the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerTotals {
    /// Sum of realized P&L over all closed positions
    pub realized_pnl: Decimal,
    /// Sum of mark-to-market P&L over all open positions
    pub unrealized_pnl: Decimal,
    /// Open position count
    pub open_count: usize,
}

/// Counts published with the portfolio summary
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LedgerSummary {
    /// Open position count
    pub open: usize,
    /// Open long positions
    pub long: usize,
    /// Open short positions
    pub short: usize,
    /// Positions frozen pending manual review
    pub frozen: usize,
    /// Closed position count since startup
    pub closed: usize,
}

/// Authoritative record of open positions
///
/// Single-owner: the coordinator holds the only mutable reference and
/// dispatches all updates, which gives per-position FIFO ordering for free.
#[derive(Debug, Default)]
pub struct PositionLedger {
    open: HashMap<PositionId, Position>,
    realized_pnl: Decimal,
    closed_count: usize,
}

impl PositionLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a confirmed fill as an open position
    pub fn open_position(
        &mut self,
        fill: &OpenConfirmation,
        opened_at: DateTime<Utc>,
    ) -> Result<Position, LedgerError> {
        if fill.size <= Decimal::ZERO {
            return Err(LedgerError::InvalidSize {
                id: fill.position_id.clone(),
                size: fill.size,
            });
        }
        if fill.entry_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice {
                id: fill.position_id.clone(),
                price: fill.entry_price,
            });
        }
        if self.open.contains_key(&fill.position_id) {
            return Err(LedgerError::DuplicatePosition(fill.position_id.clone()));
        }

        let position = Position {
            id: fill.position_id.clone(),
            symbol: fill.symbol.clone(),
            strategy: fill.strategy,
            side: fill.side,
            entry_price: fill.entry_price,
            current_price: fill.entry_price,
            size: fill.size,
            opened_at,
            frozen: false,
        };
        self.open.insert(position.id.clone(), position.clone());
        Ok(position)
    }

    /// Mark a position to a new price
    pub fn apply_price(&mut self, update: &PriceUpdate) -> Result<Position, LedgerError> {
        if update.current_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice {
                id: update.position_id.clone(),
                price: update.current_price,
            });
        }
        let position = self
            .open
            .get_mut(&update.position_id)
            .ok_or_else(|| LedgerError::UnknownPosition(update.position_id.clone()))?;
        position.current_price = update.current_price;
        Ok(position.clone())
    }

    /// Remove a position on confirmed full close, realizing its P&L
    pub fn close_position(
        &mut self,
        confirmation: &CloseConfirmation,
        closed_at: DateTime<Utc>,
    ) -> Result<ClosedPosition, LedgerError> {
        if confirmation.exit_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice {
                id: confirmation.position_id.clone(),
                price: confirmation.exit_price,
            });
        }
        let position = self
            .open
            .remove(&confirmation.position_id)
            .ok_or_else(|| LedgerError::UnknownPosition(confirmation.position_id.clone()))?;

        let realized_pnl = match position.side {
            Side::Long => (confirmation.exit_price - position.entry_price) * position.size,
            Side::Short => (position.entry_price - confirmation.exit_price) * position.size,
        };
        self.realized_pnl += realized_pnl;
        self.closed_count += 1;
        Ok(ClosedPosition {
            position,
            exit_price: confirmation.exit_price,
            closed_at,
            realized_pnl,
        })
    }

    /// Exclude a position from further trailing adjustment
    pub fn freeze(&mut self, id: &str) -> Result<(), LedgerError> {
        let position = self
            .open
            .get_mut(id)
            .ok_or_else(|| LedgerError::UnknownPosition(id.to_string()))?;
        position.frozen = true;
        Ok(())
    }

    /// Look up an open position
    pub fn get(&self, id: &str) -> Option<&Position> {
        self.open.get(id)
    }

    /// Iterate open positions
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    /// Open position count
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Consistent point-in-time copy of all open positions
    pub fn snapshot(&self) -> Vec<Position> {
        self.open.values().cloned().collect()
    }

    /// Current P&L totals; unrealized is re-derived from the open marks
    pub fn totals(&self) -> LedgerTotals {
        LedgerTotals {
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.open.values().map(|p| p.unrealized_pnl()).sum(),
            open_count: self.open.len(),
        }
    }

    /// Sum of current notional over all open positions
    pub fn total_exposure(&self) -> Decimal {
        self.open.values().map(|p| p.notional()).sum()
    }

    /// Counts for the published summary
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            open: self.open.len(),
            long: self.open.values().filter(|p| p.side == Side::Long).count(),
            short: self.open.values().filter(|p| p.side == Side::Short).count(),
            frozen: self.open.values().filter(|p| p.frozen).count(),
            closed: self.closed_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StrategyKind;
    use rust_decimal_macros::dec;

    fn create_test_fill(id: &str, side: Side, entry: Decimal, size: Decimal) -> OpenConfirmation {
        OpenConfirmation {
            position_id: id.to_string(),
            strategy: StrategyKind::TrendFollowing,
            symbol: "BTCUSDT".to_string(),
            side,
            entry_price: entry,
            size,
        }
    }

    fn price(id: &str, price: Decimal) -> PriceUpdate {
        PriceUpdate {
            position_id: id.to_string(),
            current_price: price,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_open_and_mark() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(2)), Utc::now())
            .unwrap();

        let position = ledger.apply_price(&price("p1", dec!(105))).unwrap();
        assert_eq!(position.current_price, dec!(105));
        // (105 - 100) * 2 = 10
        assert_eq!(position.unrealized_pnl(), dec!(10));
    }

    #[test]
    fn test_open_rejects_duplicate_id() {
        let mut ledger = PositionLedger::new();
        let fill = create_test_fill("p1", Side::Long, dec!(100), dec!(1));
        ledger.open_position(&fill, Utc::now()).unwrap();

        let err = ledger.open_position(&fill, Utc::now()).unwrap_err();
        assert_eq!(err, LedgerError::DuplicatePosition("p1".to_string()));
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn test_open_rejects_non_positive_size() {
        let mut ledger = PositionLedger::new();
        let err = ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(0)), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSize { .. }));
    }

    #[test]
    fn test_apply_price_unknown_position() {
        let mut ledger = PositionLedger::new();
        let err = ledger.apply_price(&price("ghost", dec!(100))).unwrap_err();
        assert_eq!(err, LedgerError::UnknownPosition("ghost".to_string()));
    }

    #[test]
    fn test_apply_price_rejects_non_positive() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(1)), Utc::now())
            .unwrap();

        let err = ledger.apply_price(&price("p1", dec!(0))).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPrice { .. }));
        // Last valid price retained
        assert_eq!(ledger.get("p1").unwrap().current_price, dec!(100));
    }

    #[test]
    fn test_close_realizes_pnl_long() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(2)), Utc::now())
            .unwrap();

        let closed = ledger
            .close_position(
                &CloseConfirmation {
                    position_id: "p1".to_string(),
                    exit_price: dec!(110),
                },
                Utc::now(),
            )
            .unwrap();

        // (110 - 100) * 2 = 20
        assert_eq!(closed.realized_pnl, dec!(20));
        assert_eq!(ledger.open_count(), 0);
        assert_eq!(ledger.totals().realized_pnl, dec!(20));
    }

    #[test]
    fn test_close_realizes_pnl_short() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Short, dec!(100), dec!(3)), Utc::now())
            .unwrap();

        let closed = ledger
            .close_position(
                &CloseConfirmation {
                    position_id: "p1".to_string(),
                    exit_price: dec!(90),
                },
                Utc::now(),
            )
            .unwrap();

        // (100 - 90) * 3 = 30
        assert_eq!(closed.realized_pnl, dec!(30));
    }

    #[test]
    fn test_totals_track_marks_and_closes() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(1)), Utc::now())
            .unwrap();
        ledger
            .open_position(&create_test_fill("p2", Side::Short, dec!(200), dec!(1)), Utc::now())
            .unwrap();

        ledger.apply_price(&price("p1", dec!(110))).unwrap();
        ledger.apply_price(&price("p2", dec!(195))).unwrap();

        let totals = ledger.totals();
        // p1: +10, p2: +5
        assert_eq!(totals.unrealized_pnl, dec!(15));
        assert_eq!(totals.realized_pnl, dec!(0));
        assert_eq!(totals.open_count, 2);

        ledger
            .close_position(
                &CloseConfirmation {
                    position_id: "p1".to_string(),
                    exit_price: dec!(110),
                },
                Utc::now(),
            )
            .unwrap();

        let totals = ledger.totals();
        assert_eq!(totals.realized_pnl, dec!(10));
        assert_eq!(totals.unrealized_pnl, dec!(5));
    }

    #[test]
    fn test_realized_pnl_folds_across_reopened_ids() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(2)), Utc::now())
            .unwrap();
        ledger
            .close_position(
                &CloseConfirmation {
                    position_id: "p1".to_string(),
                    exit_price: dec!(110),
                },
                Utc::now(),
            )
            .unwrap();

        // Same id reused after the close; realized P&L keeps folding.
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(110), dec!(1)), Utc::now())
            .unwrap();
        ledger
            .close_position(
                &CloseConfirmation {
                    position_id: "p1".to_string(),
                    exit_price: dec!(105),
                },
                Utc::now(),
            )
            .unwrap();

        // +20 then -5
        assert_eq!(ledger.totals().realized_pnl, dec!(15));
        assert_eq!(ledger.summary().closed, 2);
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_freeze_flags_position() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(1)), Utc::now())
            .unwrap();

        ledger.freeze("p1").unwrap();
        assert!(ledger.get("p1").unwrap().frozen);
        assert_eq!(ledger.summary().frozen, 1);

        assert!(ledger.freeze("ghost").is_err());
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(1)), Utc::now())
            .unwrap();

        let snapshot = ledger.snapshot();
        ledger.apply_price(&price("p1", dec!(200))).unwrap();

        assert_eq!(snapshot[0].current_price, dec!(100));
    }

    #[test]
    fn test_summary_counts_sides() {
        let mut ledger = PositionLedger::new();
        ledger
            .open_position(&create_test_fill("p1", Side::Long, dec!(100), dec!(1)), Utc::now())
            .unwrap();
        ledger
            .open_position(&create_test_fill("p2", Side::Short, dec!(50), dec!(1)), Utc::now())
            .unwrap();
        ledger
            .open_position(&create_test_fill("p3", Side::Long, dec!(75), dec!(1)), Utc::now())
            .unwrap();

        let summary = ledger.summary();
        assert_eq!(summary.open, 3);
        assert_eq!(summary.long, 2);
        assert_eq!(summary.short, 1);
        assert_eq!(summary.closed, 0);
    }
}
