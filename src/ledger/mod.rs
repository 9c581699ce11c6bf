//! Position ledger module
//!
//! Authoritative in-memory record of open positions and their risk state.
//! All mutation flows through the coordinator's dispatch path.

mod book;
mod types;

pub use book::{LedgerSummary, LedgerTotals, PositionLedger};
pub use types::{
    CloseConfirmation, ClosedPosition, FillEvent, LedgerError, OpenConfirmation, Position,
    PositionId, PriceUpdate, Side, StrategyKind,
};
