//! Trade validation module
//!
//! The public gate for trade proposals: ordered limit checks against the
//! breaker state, the current limit snapshot, and live ledger exposure.

mod audit;

pub use audit::{LimitCheck, ValidationAudit, ValidatorStats};

use crate::breaker::BreakerState;
use crate::ledger::{Position, Side, StrategyKind};
use crate::limits::RiskLimitConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Proposed trade from the proposals topic. Read-only to this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    #[serde(default)]
    pub proposal_id: String,
    pub symbol: String,
    #[serde(rename = "strategy_kind")]
    pub strategy: StrategyKind,
    pub side: Side,
    /// Base quantity
    pub size: Decimal,
    pub leverage: Decimal,
    pub entry_price: Decimal,
    #[serde(rename = "stop_loss", default)]
    pub stop_price: Option<Decimal>,
    #[serde(rename = "take_profit", default)]
    pub target_price: Option<Decimal>,
}

impl TradeProposal {
    /// Notional value at the proposed entry
    pub fn notional(&self) -> Decimal {
        self.size * self.entry_price
    }
}

/// Validation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected { reason: String },
    Conditional { conditions: Vec<String> },
}

/// Symbol to correlation-group lookup. A symbol without a configured
/// group correlates only with itself.
#[derive(Debug, Clone, Default)]
pub struct CorrelationMap {
    groups: HashMap<String, String>,
}

impl CorrelationMap {
    pub fn new(groups: HashMap<String, String>) -> Self {
        Self { groups }
    }

    pub fn group_of<'a>(&'a self, symbol: &'a str) -> &'a str {
        self.groups.get(symbol).map(String::as_str).unwrap_or(symbol)
    }

    pub fn correlated(&self, a: &str, b: &str) -> bool {
        self.group_of(a) == self.group_of(b)
    }
}

const CHECK_BREAKER: &str = "circuit_breaker";
const CHECK_POSITION_SIZE: &str = "position_size";
const CHECK_LEVERAGE: &str = "leverage";
const CHECK_CORRELATED_EXPOSURE: &str = "correlated_exposure";
const CHECK_CONCURRENT_POSITIONS: &str = "concurrent_positions";
const CHECK_STOP_DISTANCE: &str = "stop_distance";

/// Validates trade proposals with ordered, short-circuiting checks.
///
/// The first hard failure rejects the proposal; the stop-distance check
/// is advisory and downgrades an approval to Conditional instead. Every
/// decision is returned as a full [`ValidationAudit`] for persistence
/// and adaptive tuning.
#[derive(Debug)]
pub struct RiskValidator {
    correlation: CorrelationMap,
    stats: ValidatorStats,
}

impl RiskValidator {
    pub fn new(correlation: CorrelationMap) -> Self {
        Self {
            correlation,
            stats: ValidatorStats::default(),
        }
    }

    pub fn stats(&self) -> ValidatorStats {
        self.stats
    }

    /// Validate one proposal against the current limits and exposure.
    ///
    /// `balance` is the recomputed portfolio balance and `open` the live
    /// ledger snapshot; both come from the coordinator's dispatch path.
    pub fn validate(
        &mut self,
        proposal: &TradeProposal,
        limits: &RiskLimitConfig,
        breaker: BreakerState,
        balance: Decimal,
        open: &[Position],
        now: DateTime<Utc>,
    ) -> ValidationAudit {
        let mut checks = Vec::new();
        let decision = self.run_checks(proposal, limits, breaker, balance, open, &mut checks);
        self.stats.record(&decision);
        ValidationAudit {
            id: Uuid::new_v4(),
            at: now,
            proposal_id: proposal.proposal_id.clone(),
            symbol: proposal.symbol.clone(),
            strategy: proposal.strategy,
            checks,
            decision,
        }
    }

    fn run_checks(
        &self,
        proposal: &TradeProposal,
        limits: &RiskLimitConfig,
        breaker: BreakerState,
        balance: Decimal,
        open: &[Position],
        checks: &mut Vec<LimitCheck>,
    ) -> Decision {
        // 1. Breaker state. Nothing passes an open breaker.
        let breaker_ok = breaker != BreakerState::Open;
        checks.push(LimitCheck::new(
            CHECK_BREAKER,
            breaker_ok,
            None,
            None,
            format!("circuit breaker is {breaker}"),
        ));
        if !breaker_ok {
            return Decision::Rejected {
                reason: format!("circuit breaker is {breaker}; all proposals rejected"),
            };
        }

        let strategy_limits = match limits.strategy(proposal.strategy) {
            Some(l) => l,
            None => {
                let message = format!("no limits configured for strategy {}", proposal.strategy);
                checks.push(LimitCheck::new(
                    CHECK_POSITION_SIZE,
                    false,
                    None,
                    None,
                    message.clone(),
                ));
                return Decision::Rejected { reason: message };
            }
        };

        // 2. Position size as a fraction of balance.
        let size_check = self.check_position_size(proposal, strategy_limits.max_position_pct, balance);
        let failed = !size_check.passed;
        let reason = size_check.message.clone();
        checks.push(size_check);
        if failed {
            return Decision::Rejected { reason };
        }

        // 3. Leverage.
        let leverage_ok =
            proposal.leverage > Decimal::ZERO && proposal.leverage <= strategy_limits.max_leverage;
        let message = if leverage_ok {
            "leverage within limit".to_string()
        } else {
            format!(
                "leverage {} exceeds {} limit {}",
                proposal.leverage, proposal.strategy, strategy_limits.max_leverage
            )
        };
        checks.push(LimitCheck::new(
            CHECK_LEVERAGE,
            leverage_ok,
            Some(proposal.leverage),
            Some(strategy_limits.max_leverage),
            message.clone(),
        ));
        if !leverage_ok {
            return Decision::Rejected { reason: message };
        }

        // 4. Same-direction correlated exposure.
        let exposure_check = self.check_correlated_exposure(proposal, limits, balance, open);
        let failed = !exposure_check.passed;
        let reason = exposure_check.message.clone();
        checks.push(exposure_check);
        if failed {
            return Decision::Rejected { reason };
        }

        // 5. Concurrent open positions.
        let max_concurrent = limits.portfolio.max_concurrent_positions;
        let concurrent_ok = open.len() < max_concurrent;
        let message = if concurrent_ok {
            "concurrent position count within limit".to_string()
        } else {
            format!(
                "already holding {} positions, limit is {}",
                open.len(),
                max_concurrent
            )
        };
        checks.push(LimitCheck::new(
            CHECK_CONCURRENT_POSITIONS,
            concurrent_ok,
            Some(Decimal::from(open.len())),
            Some(Decimal::from(max_concurrent)),
            message.clone(),
        ));
        if !concurrent_ok {
            return Decision::Rejected { reason: message };
        }

        // 6. Stop distance, advisory only.
        if let Some(condition) = self.check_stop_distance(proposal, strategy_limits.stop_loss_pct, checks)
        {
            return Decision::Conditional {
                conditions: vec![condition],
            };
        }

        Decision::Approved
    }

    fn check_position_size(
        &self,
        proposal: &TradeProposal,
        max_position_pct: Decimal,
        balance: Decimal,
    ) -> LimitCheck {
        if proposal.size <= Decimal::ZERO || proposal.entry_price <= Decimal::ZERO {
            return LimitCheck::new(
                CHECK_POSITION_SIZE,
                false,
                None,
                Some(max_position_pct),
                format!(
                    "malformed proposal: size {} at entry price {}",
                    proposal.size, proposal.entry_price
                ),
            );
        }
        if balance <= Decimal::ZERO {
            return LimitCheck::new(
                CHECK_POSITION_SIZE,
                false,
                None,
                Some(max_position_pct),
                format!("cannot size against non-positive balance {balance}"),
            );
        }
        let fraction = proposal.notional() / balance;
        let passed = fraction <= max_position_pct;
        let message = if passed {
            "position size within limit".to_string()
        } else {
            format!(
                "position size {} of balance exceeds {} limit {}",
                fraction.round_dp(4),
                proposal.strategy,
                max_position_pct
            )
        };
        LimitCheck::new(
            CHECK_POSITION_SIZE,
            passed,
            Some(fraction),
            Some(max_position_pct),
            message,
        )
    }

    fn check_correlated_exposure(
        &self,
        proposal: &TradeProposal,
        limits: &RiskLimitConfig,
        balance: Decimal,
        open: &[Position],
    ) -> LimitCheck {
        let ceiling = limits.portfolio.max_correlated_exposure_pct;
        let group = self.correlation.group_of(&proposal.symbol);
        let existing: Decimal = open
            .iter()
            .filter(|p| p.side == proposal.side && self.correlation.group_of(&p.symbol) == group)
            .map(Position::notional)
            .sum();
        let fraction = (existing + proposal.notional()) / balance;
        let passed = fraction <= ceiling;
        let message = if passed {
            "correlated exposure within limit".to_string()
        } else {
            format!(
                "same-direction exposure in group {group} would reach {} of balance, limit is {ceiling}",
                fraction.round_dp(4)
            )
        };
        LimitCheck::new(
            CHECK_CORRELATED_EXPOSURE,
            passed,
            Some(fraction),
            Some(ceiling),
            message,
        )
    }

    /// Returns the advisory condition when the proposed stop sits wider
    /// than the strategy's configured stop-loss fraction.
    fn check_stop_distance(
        &self,
        proposal: &TradeProposal,
        stop_loss_pct: Decimal,
        checks: &mut Vec<LimitCheck>,
    ) -> Option<String> {
        let Some(stop) = proposal.stop_price else {
            checks.push(LimitCheck::new(
                CHECK_STOP_DISTANCE,
                true,
                None,
                Some(stop_loss_pct),
                "no stop supplied, strategy stop-loss fraction applies",
            ));
            return None;
        };
        let distance = ((proposal.entry_price - stop) / proposal.entry_price).abs();
        let passed = distance <= stop_loss_pct;
        let message = if passed {
            "stop distance within configured fraction".to_string()
        } else {
            format!(
                "stop distance {} is wider than the configured {} fraction {stop_loss_pct}",
                distance.round_dp(4),
                proposal.strategy
            )
        };
        checks.push(LimitCheck::new(
            CHECK_STOP_DISTANCE,
            passed,
            Some(distance),
            Some(stop_loss_pct),
            message.clone(),
        ));
        (!passed).then_some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn create_test_proposal(strategy: StrategyKind, size: Decimal, leverage: Decimal) -> TradeProposal {
        TradeProposal {
            proposal_id: "prop-1".to_string(),
            symbol: "BTC-USD".to_string(),
            strategy,
            side: Side::Long,
            size,
            leverage,
            entry_price: dec!(100),
            stop_price: None,
            target_price: None,
        }
    }

    fn create_test_position(symbol: &str, side: Side, notional: Decimal) -> Position {
        Position {
            id: format!("pos-{symbol}"),
            symbol: symbol.to_string(),
            strategy: StrategyKind::TrendFollowing,
            side,
            entry_price: dec!(100),
            current_price: dec!(100),
            size: notional / dec!(100),
            opened_at: Utc::now(),
            frozen: false,
        }
    }

    fn validate(
        validator: &mut RiskValidator,
        proposal: &TradeProposal,
        breaker: BreakerState,
        open: &[Position],
    ) -> ValidationAudit {
        validator.validate(
            proposal,
            &RiskLimitConfig::default(),
            breaker,
            dec!(10000),
            open,
            Utc::now(),
        )
    }

    #[test]
    fn test_conservative_proposal_approved() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        // 10 * 100 = 1000 notional, 0.10 of balance, under the 0.15 limit
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(10), dec!(1.0));
        let audit = validate(&mut validator, &proposal, BreakerState::Closed, &[]);

        assert_eq!(audit.decision, Decision::Approved);
        assert_eq!(audit.checks.len(), 6);
        assert!(audit.checks.iter().all(|c| c.passed));
        assert_eq!(validator.stats().approved, 1);
    }

    #[test]
    fn test_open_breaker_rejects_everything() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        // The most conservative proposal imaginable still bounces.
        let proposal = create_test_proposal(StrategyKind::Arbitrage, dec!(0.01), dec!(1.0));
        let audit = validate(&mut validator, &proposal, BreakerState::Open, &[]);

        match &audit.decision {
            Decision::Rejected { reason } => assert!(reason.contains("circuit breaker")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(audit.checks.len(), 1);
    }

    #[test]
    fn test_recovering_breaker_allows_validation() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(10), dec!(1.0));
        let audit = validate(&mut validator, &proposal, BreakerState::Recovering, &[]);
        assert_eq!(audit.decision, Decision::Approved);
    }

    #[test]
    fn test_oversized_position_rejected_with_limit_values() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        // 20 * 100 = 2000 notional, 0.20 of balance, over the 0.15 limit
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(20), dec!(1.0));
        let audit = validate(&mut validator, &proposal, BreakerState::Closed, &[]);

        assert!(matches!(audit.decision, Decision::Rejected { .. }));
        let check = audit.checks.iter().find(|c| c.name == "position_size").unwrap();
        assert_eq!(check.evaluated, Some(dec!(0.20)));
        assert_eq!(check.limit, Some(dec!(0.15)));
        assert!(audit.max_utilization() > dec!(1));
    }

    #[test]
    fn test_excess_leverage_rejected() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(10), dec!(1.5));
        let audit = validate(&mut validator, &proposal, BreakerState::Closed, &[]);

        match &audit.decision {
            Decision::Rejected { reason } => assert!(reason.contains("leverage")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_correlated_exposure_counts_same_direction_only() {
        let groups = HashMap::from([
            ("BTC-USD".to_string(), "crypto-majors".to_string()),
            ("ETH-USD".to_string(), "crypto-majors".to_string()),
        ]);
        let mut validator = RiskValidator::new(CorrelationMap::new(groups));

        // Existing long ETH of 1500 plus proposed long BTC of 1200:
        // (1500 + 1200) / 10000 = 0.27 > 0.25 ceiling
        let open = vec![create_test_position("ETH-USD", Side::Long, dec!(1500))];
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(12), dec!(1.0));
        let audit = validate(&mut validator, &proposal, BreakerState::Closed, &open);
        match &audit.decision {
            Decision::Rejected { reason } => assert!(reason.contains("crypto-majors")),
            other => panic!("expected rejection, got {other:?}"),
        }

        // The same notional short is uncorrelated with the long book.
        let mut short = create_test_proposal(StrategyKind::TrendFollowing, dec!(12), dec!(1.0));
        short.side = Side::Short;
        let audit = validate(&mut validator, &short, BreakerState::Closed, &open);
        assert_eq!(audit.decision, Decision::Approved);
    }

    #[test]
    fn test_ungrouped_symbols_do_not_correlate() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        let open = vec![create_test_position("ETH-USD", Side::Long, dec!(2400))];
        // BTC alone is 0.12 of balance; with ETH it would be 0.36, but
        // without a shared group only BTC counts.
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(12), dec!(1.0));
        let audit = validate(&mut validator, &proposal, BreakerState::Closed, &open);
        assert_eq!(audit.decision, Decision::Approved);
    }

    #[test]
    fn test_concurrent_position_ceiling() {
        let mut limits = RiskLimitConfig::default();
        limits.portfolio.max_concurrent_positions = 2;
        let mut validator = RiskValidator::new(CorrelationMap::default());
        let open = vec![
            create_test_position("ETH-USD", Side::Long, dec!(100)),
            create_test_position("SOL-USD", Side::Short, dec!(100)),
        ];
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(1), dec!(1.0));
        let audit = validator.validate(
            &proposal,
            &limits,
            BreakerState::Closed,
            dec!(10000),
            &open,
            Utc::now(),
        );
        match &audit.decision {
            Decision::Rejected { reason } => assert!(reason.contains("limit is 2")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_wide_stop_downgrades_to_conditional() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        let mut proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(10), dec!(1.0));
        // 5% stop distance against the configured 1%
        proposal.stop_price = Some(dec!(95));
        let audit = validate(&mut validator, &proposal, BreakerState::Closed, &[]);

        match &audit.decision {
            Decision::Conditional { conditions } => {
                assert_eq!(conditions.len(), 1);
                assert!(conditions[0].contains("stop distance"));
            }
            other => panic!("expected conditional, got {other:?}"),
        }
        assert_eq!(validator.stats().conditional, 1);
    }

    #[test]
    fn test_malformed_proposal_rejected_and_audited() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(0), dec!(1.0));
        let audit = validate(&mut validator, &proposal, BreakerState::Closed, &[]);

        match &audit.decision {
            Decision::Rejected { reason } => assert!(reason.contains("malformed")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(validator.stats().rejected, 1);
    }

    #[test]
    fn test_near_limit_approval_reports_high_utilization() {
        let mut validator = RiskValidator::new(CorrelationMap::default());
        // 14 * 100 = 1400 notional, 0.14 of balance against the 0.15 limit
        let proposal = create_test_proposal(StrategyKind::TrendFollowing, dec!(14), dec!(1.0));
        let audit = validate(&mut validator, &proposal, BreakerState::Closed, &[]);

        assert_eq!(audit.decision, Decision::Approved);
        assert!(audit.max_utilization() >= dec!(0.90));
    }
}
