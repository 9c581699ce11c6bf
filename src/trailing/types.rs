//! Trailing stop types

use crate::ledger::{PositionId, Side, StrategyKind};
use crate::limits::TrailingParams;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle phase of one trailing stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPhase {
    /// Profit below the activation threshold; the static stop governs
    PendingActivation,
    /// Trailing the best observed price at the configured distance
    Active,
    /// Trailing at the tightened distance
    Tightening,
    /// Price crossed the stop; close instruction emitted. Terminal.
    Triggered,
    /// Position closed externally before the stop fired. Terminal.
    Closed,
}

impl StopPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StopPhase::Triggered | StopPhase::Closed)
    }
}

/// Why a close instruction was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Trailing stop crossed
    TrailingStop,
    /// Static stop crossed before the trailing stop activated
    StaticStop,
    /// Daily loss limit breached, portfolio-wide close-out
    DailyLossBreach,
    /// Circuit breaker opened
    CircuitBreaker,
}

/// Instruction published to the execution topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StopAction {
    /// Move a protective stop to a new price
    UpdateStop {
        position_id: PositionId,
        new_stop_price: Decimal,
    },
    /// Close a position at market
    Close {
        position_id: PositionId,
        stop_price: Decimal,
        reason: CloseReason,
    },
}

/// Trailing state for one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub position_id: PositionId,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub side: Side,
    pub entry_price: Decimal,
    /// Most favorable price observed since entry
    pub best_price: Decimal,
    /// Current protective stop
    pub stop_price: Decimal,
    pub phase: StopPhase,
    pub params: TrailingParams,
    /// Last time the stop moved or the phase changed
    pub last_adjusted: DateTime<Utc>,
}

impl TrailingStop {
    /// Profit fraction relative to entry at the given price
    pub fn profit_fraction(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        match self.side {
            Side::Long => (price - self.entry_price) / self.entry_price,
            Side::Short => (self.entry_price - price) / self.entry_price,
        }
    }

    /// Whether `price` has crossed the protective stop
    pub fn crossed_by(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price <= self.stop_price,
            Side::Short => price >= self.stop_price,
        }
    }

    /// Trailing distance for the current phase
    pub fn effective_distance(&self) -> Decimal {
        match self.phase {
            StopPhase::Tightening => {
                (self.params.trailing_distance - self.params.tightening_step).max(Decimal::ZERO)
            }
            _ => self.params.trailing_distance,
        }
    }

    /// Check the structural invariants of this stop.
    ///
    /// An active long stop must sit at or below the best price, a short
    /// at or above it, and every price must be positive. Used after
    /// checkpoint restore to catch corrupted state.
    pub fn validate(&self) -> Result<(), TrailingError> {
        let violation = |detail: &str| TrailingError::InvariantViolation {
            position_id: self.position_id.clone(),
            detail: detail.to_string(),
        };
        if self.entry_price <= Decimal::ZERO
            || self.best_price <= Decimal::ZERO
            || self.stop_price <= Decimal::ZERO
        {
            return Err(violation("non-positive price"));
        }
        if matches!(self.phase, StopPhase::Active | StopPhase::Tightening) {
            match self.side {
                Side::Long if self.stop_price > self.best_price => {
                    return Err(violation("long stop above best price"));
                }
                Side::Short if self.stop_price < self.best_price => {
                    return Err(violation("short stop below best price"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Phase counts across all tracked stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrailingSummary {
    pub total: usize,
    pub pending_activation: usize,
    pub active: usize,
    pub tightening: usize,
    pub triggered: usize,
}

/// Trailing stop errors
#[derive(Debug, Error, PartialEq)]
pub enum TrailingError {
    #[error("no trailing stop for position {0}")]
    UnknownPosition(PositionId),
    #[error("trailing stop already registered for position {0}")]
    DuplicateStop(PositionId),
    #[error("invalid price {price} for position {position_id}")]
    InvalidPrice {
        position_id: PositionId,
        price: Decimal,
    },
    #[error("trailing invariant violated for position {position_id}: {detail}")]
    InvariantViolation {
        position_id: PositionId,
        detail: String,
    },
}
