//! Position and fill types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position identifier, assigned by the execution collaborator
pub type PositionId = String;

/// Closed set of strategy classes the platform runs
///
/// Adding a strategy means adding a variant and a config entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Cross-venue price discrepancy capture
    Arbitrage,
    /// Fast directional trend following
    TrendFollowing,
    /// Two-sided quoting
    MarketMaking,
    /// Event-driven entries
    NewsDriven,
    /// Slow higher-timeframe positioning
    HighTimeframe,
}

impl StrategyKind {
    /// All strategy kinds, for iteration over per-strategy configuration
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Arbitrage,
        StrategyKind::TrendFollowing,
        StrategyKind::MarketMaking,
        StrategyKind::NewsDriven,
        StrategyKind::HighTimeframe,
    ];

    /// Config/wire name of the strategy kind
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Arbitrage => "arbitrage",
            StrategyKind::TrendFollowing => "trend_following",
            StrategyKind::MarketMaking => "market_making",
            StrategyKind::NewsDriven => "news_driven",
            StrategyKind::HighTimeframe => "high_timeframe",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Profits when price rises
    Long,
    /// Profits when price falls
    Short,
}

/// An open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Position identifier
    pub id: PositionId,
    /// Traded symbol
    pub symbol: String,
    /// Strategy that opened the position
    pub strategy: StrategyKind,
    /// Position direction
    pub side: Side,
    /// Entry price
    pub entry_price: Decimal,
    /// Last marked price
    pub current_price: Decimal,
    /// Position size in base units
    pub size: Decimal,
    /// Open timestamp
    pub opened_at: DateTime<Utc>,
    /// Excluded from trailing adjustment after an invariant violation
    pub frozen: bool,
}

impl Position {
    /// Mark-to-market P&L at the current price
    pub fn unrealized_pnl(&self) -> Decimal {
        match self.side {
            Side::Long => (self.current_price - self.entry_price) * self.size,
            Side::Short => (self.entry_price - self.current_price) * self.size,
        }
    }

    /// Current notional value
    pub fn notional(&self) -> Decimal {
        self.current_price * self.size
    }

    /// Favorable price movement as a fraction of entry
    ///
    /// Positive when the position is in profit, for either side.
    pub fn profit_fraction(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        match self.side {
            Side::Long => (self.current_price - self.entry_price) / self.entry_price,
            Side::Short => (self.entry_price - self.current_price) / self.entry_price,
        }
    }
}

/// A fully closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    /// Original position at close time
    pub position: Position,
    /// Exit price
    pub exit_price: Decimal,
    /// Close timestamp
    pub closed_at: DateTime<Utc>,
    /// Realized P&L
    pub realized_pnl: Decimal,
}

/// Inbound per-position price update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Target position
    pub position_id: PositionId,
    /// Latest traded price
    pub current_price: Decimal,
    /// When the price was observed
    pub timestamp: DateTime<Utc>,
}

/// Execution confirmation that a position was opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenConfirmation {
    /// Position identifier
    pub position_id: PositionId,
    /// Strategy that opened the position
    #[serde(rename = "strategy_kind")]
    pub strategy: StrategyKind,
    /// Traded symbol
    pub symbol: String,
    /// Position direction
    pub side: Side,
    /// Fill price
    pub entry_price: Decimal,
    /// Filled size in base units
    pub size: Decimal,
}

/// Execution confirmation that a position was fully closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseConfirmation {
    /// Position identifier
    pub position_id: PositionId,
    /// Exit price
    pub exit_price: Decimal,
}

/// Fill-topic envelope distinguishing opens from closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FillEvent {
    /// A position was opened
    Opened(OpenConfirmation),
    /// A position was fully closed
    Closed(CloseConfirmation),
}

/// Position ledger errors
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    /// No open position with this id
    #[error("unknown position: {0}")]
    UnknownPosition(PositionId),
    /// A position with this id is already open
    #[error("duplicate position: {0}")]
    DuplicatePosition(PositionId),
    /// Size must be strictly positive
    #[error("invalid size {size} for position {id}")]
    InvalidSize {
        /// Offending position id
        id: PositionId,
        /// Rejected size
        size: Decimal,
    },
    /// Price must be strictly positive
    #[error("invalid price {price} for position {id}")]
    InvalidPrice {
        /// Offending position id
        id: PositionId,
        /// Rejected price
        price: Decimal,
    },
}
