//! Coordinator event surface

use crate::breaker::{BreakerState, BreakerStatus};
use crate::bus::{topics, BusMessage};
use crate::breaker::OverrideRequest;
use crate::ledger::{FillEvent, LedgerSummary, PositionId, PriceUpdate, StrategyKind};
use crate::limits::AdjustmentKind;
use crate::portfolio::PerformanceStatus;
use crate::trailing::TrailingSummary;
use crate::validator::{TradeProposal, ValidatorStats};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Inbound event decoded from a bus message
#[derive(Debug, Clone, PartialEq)]
pub enum RiskEvent {
    Price(PriceUpdate),
    Proposal(TradeProposal),
    Fill(FillEvent),
    Override(OverrideRequest),
}

impl RiskEvent {
    /// Decode a bus message by topic. Undecodable payloads return
    /// `None`; the caller logs and drops them without touching state.
    pub fn decode(message: &BusMessage) -> Option<RiskEvent> {
        let payload = message.payload.clone();
        match message.topic.as_str() {
            topics::PRICES => serde_json::from_value(payload).ok().map(RiskEvent::Price),
            topics::PROPOSALS => serde_json::from_value(payload).ok().map(RiskEvent::Proposal),
            topics::FILLS => serde_json::from_value(payload).ok().map(RiskEvent::Fill),
            topics::OVERRIDES => serde_json::from_value(payload).ok().map(RiskEvent::Override),
            _ => None,
        }
    }
}

/// Aggregated portfolio view published on the mid cadence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub at: DateTime<Utc>,
    pub status: PerformanceStatus,
    pub balance: Decimal,
    pub daily_pnl_fraction: Decimal,
    pub weekly_pnl_fraction: Decimal,
    pub daily_high_water: Decimal,
    pub daily_low_water: Decimal,
    pub weekly_high_water: Decimal,
    pub weekly_low_water: Decimal,
    pub circuit_breaker_state: BreakerState,
    pub active_trailing_stops_count: usize,
    pub open_positions: usize,
    /// Current notional across all open positions
    pub total_exposure: Decimal,
    pub positions: LedgerSummary,
    pub trailing: TrailingSummary,
    pub validation: ValidatorStats,
    /// Version of the limit snapshot in force
    pub limit_version: u64,
}

/// Alert published to the risk alerts topic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "alert", rename_all = "snake_case")]
pub enum RiskAlert {
    /// Daily drawdown crossed the warning fraction
    DailyLossWarning {
        daily_pnl_pct: Decimal,
        balance: Decimal,
    },
    /// Circuit breaker changed state
    BreakerTransition {
        from: BreakerState,
        to: BreakerState,
        status: BreakerStatus,
    },
    /// Weekly reward target reached
    WeeklyTargetAchieved { weekly_pnl_pct: Decimal },
    /// A position was frozen pending manual review
    PositionFrozen {
        position_id: PositionId,
        detail: String,
    },
    /// Adaptive tuning replaced the limit snapshot
    LimitsAdjusted {
        strategy: StrategyKind,
        kind: AdjustmentKind,
        factor: Decimal,
        version: u64,
    },
}
