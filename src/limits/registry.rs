//! Versioned risk limit snapshots

use crate::ledger::{Side, StrategyKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Inclusive floor and ceiling for one adjustable limit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: Decimal,
    pub max: Decimal,
}

impl Bound {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    /// Clamp a value into this bound
    pub fn clamp(&self, value: Decimal) -> Decimal {
        value.max(self.min).min(self.max)
    }
}

/// Trailing-stop parameters for strategies that use trailing protection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingParams {
    /// Profit fraction at which the stop activates
    pub activation_threshold: Decimal,
    /// Distance of the stop below/above the best observed price
    pub trailing_distance: Decimal,
    /// Amount subtracted from the distance once profit reaches `tighten_at`
    pub tightening_step: Decimal,
    /// Profit fraction at which the distance tightens
    pub tighten_at: Decimal,
}

/// Per-strategy risk limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyLimits {
    /// Maximum position notional as a fraction of account balance
    pub max_position_pct: Decimal,
    /// Maximum leverage multiple
    pub max_leverage: Decimal,
    /// Static stop-loss distance from entry
    pub stop_loss_pct: Decimal,
    /// Take-profit distance from entry
    pub take_profit_pct: Decimal,
    /// Trailing-stop parameters, absent for strategies without trailing
    #[serde(default)]
    pub trailing: Option<TrailingParams>,
}

impl StrategyLimits {
    /// Baseline limits for a strategy
    pub fn defaults_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Arbitrage => Self {
                max_position_pct: dec!(0.05),
                max_leverage: dec!(2.0),
                stop_loss_pct: dec!(0.002),
                take_profit_pct: dec!(0.01),
                trailing: None,
            },
            StrategyKind::TrendFollowing => Self {
                max_position_pct: dec!(0.15),
                max_leverage: dec!(1.2),
                stop_loss_pct: dec!(0.01),
                take_profit_pct: dec!(0.03),
                trailing: Some(TrailingParams {
                    activation_threshold: dec!(0.01),
                    trailing_distance: dec!(0.005),
                    tightening_step: dec!(0.002),
                    tighten_at: dec!(0.02),
                }),
            },
            StrategyKind::MarketMaking => Self {
                max_position_pct: dec!(0.08),
                max_leverage: dec!(3.0),
                stop_loss_pct: dec!(0.003),
                take_profit_pct: dec!(0.015),
                trailing: None,
            },
            StrategyKind::NewsDriven => Self {
                max_position_pct: dec!(0.12),
                max_leverage: dec!(1.0),
                stop_loss_pct: dec!(0.008),
                take_profit_pct: dec!(0.025),
                trailing: None,
            },
            StrategyKind::HighTimeframe => Self {
                max_position_pct: dec!(0.20),
                max_leverage: dec!(1.0),
                stop_loss_pct: dec!(0.02),
                take_profit_pct: dec!(0.05),
                trailing: Some(TrailingParams {
                    activation_threshold: dec!(0.015),
                    trailing_distance: dec!(0.01),
                    tightening_step: dec!(0.005),
                    tighten_at: dec!(0.03),
                }),
            },
        }
    }

    /// Static stop price for a fresh position at `entry`
    pub fn static_stop(&self, side: Side, entry: Decimal) -> Decimal {
        match side {
            Side::Long => entry * (Decimal::ONE - self.stop_loss_pct),
            Side::Short => entry * (Decimal::ONE + self.stop_loss_pct),
        }
    }

    /// Scale the adjustable limits by `factor`, clamped into `bounds`
    fn scaled(&self, factor: Decimal, bounds: &SafetyBounds) -> Self {
        Self {
            max_position_pct: bounds.max_position_pct.clamp(self.max_position_pct * factor),
            max_leverage: bounds.max_leverage.clamp(self.max_leverage * factor),
            stop_loss_pct: bounds.stop_loss_pct.clamp(self.stop_loss_pct * factor),
            take_profit_pct: self.take_profit_pct,
            trailing: self.trailing,
        }
    }
}

/// Hard floor/ceiling bounds that adaptive adjustments can never escape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyBounds {
    pub max_position_pct: Bound,
    pub max_leverage: Bound,
    pub stop_loss_pct: Bound,
}

impl SafetyBounds {
    /// Baseline safety bounds for a strategy
    pub fn defaults_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Arbitrage => Self {
                max_position_pct: Bound::new(dec!(0.02), dec!(0.10)),
                max_leverage: Bound::new(dec!(1.0), dec!(3.0)),
                stop_loss_pct: Bound::new(dec!(0.001), dec!(0.005)),
            },
            StrategyKind::TrendFollowing => Self {
                max_position_pct: Bound::new(dec!(0.05), dec!(0.25)),
                max_leverage: Bound::new(dec!(1.0), dec!(2.0)),
                stop_loss_pct: Bound::new(dec!(0.005), dec!(0.02)),
            },
            StrategyKind::MarketMaking => Self {
                max_position_pct: Bound::new(dec!(0.03), dec!(0.15)),
                max_leverage: Bound::new(dec!(1.5), dec!(4.0)),
                stop_loss_pct: Bound::new(dec!(0.001), dec!(0.008)),
            },
            StrategyKind::NewsDriven => Self {
                max_position_pct: Bound::new(dec!(0.05), dec!(0.20)),
                max_leverage: Bound::new(dec!(1.0), dec!(1.5)),
                stop_loss_pct: Bound::new(dec!(0.005), dec!(0.015)),
            },
            StrategyKind::HighTimeframe => Self {
                max_position_pct: Bound::new(dec!(0.10), dec!(0.30)),
                max_leverage: Bound::new(dec!(1.0), dec!(1.5)),
                stop_loss_pct: Bound::new(dec!(0.01), dec!(0.03)),
            },
        }
    }
}

/// Portfolio-wide limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioLimits {
    /// Account balance the pnl windows start from
    pub initial_balance: Decimal,
    /// Daily loss fraction that halts trading
    pub max_daily_loss_pct: Decimal,
    /// Daily loss fraction that raises a warning
    pub warning_loss_pct: Decimal,
    /// Weekly profit fraction counted as target achievement
    pub weekly_target_pct: Decimal,
    /// Maximum simultaneously open positions
    pub max_concurrent_positions: usize,
    /// Maximum same-direction exposure within one correlation group
    pub max_correlated_exposure_pct: Decimal,
}

impl Default for PortfolioLimits {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            max_daily_loss_pct: dec!(0.02),
            warning_loss_pct: dec!(0.015),
            weekly_target_pct: dec!(0.20),
            max_concurrent_positions: 10,
            max_correlated_exposure_pct: dec!(0.25),
        }
    }
}

/// Immutable limit snapshot, replaced wholesale on every change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimitConfig {
    /// Monotonically increasing snapshot version
    pub version: u64,
    pub portfolio: PortfolioLimits,
    pub strategies: HashMap<StrategyKind, StrategyLimits>,
    pub bounds: HashMap<StrategyKind, SafetyBounds>,
}

impl Default for RiskLimitConfig {
    fn default() -> Self {
        let strategies = StrategyKind::ALL
            .iter()
            .map(|&kind| (kind, StrategyLimits::defaults_for(kind)))
            .collect();
        let bounds = StrategyKind::ALL
            .iter()
            .map(|&kind| (kind, SafetyBounds::defaults_for(kind)))
            .collect();
        Self {
            version: 1,
            portfolio: PortfolioLimits::default(),
            strategies,
            bounds,
        }
    }
}

impl RiskLimitConfig {
    /// Limits for one strategy
    pub fn strategy(&self, kind: StrategyKind) -> Option<&StrategyLimits> {
        self.strategies.get(&kind)
    }

    /// Safety bounds for one strategy
    pub fn bounds_for(&self, kind: StrategyKind) -> Option<&SafetyBounds> {
        self.bounds.get(&kind)
    }
}

/// Owns the current limit snapshot and swaps it atomically
#[derive(Debug)]
pub struct RiskLimitRegistry {
    current: Arc<RiskLimitConfig>,
}

impl RiskLimitRegistry {
    pub fn new(config: RiskLimitConfig) -> Self {
        Self {
            current: Arc::new(config),
        }
    }

    /// Cheap clone of the current snapshot
    pub fn snapshot(&self) -> Arc<RiskLimitConfig> {
        Arc::clone(&self.current)
    }

    /// Current snapshot version
    pub fn version(&self) -> u64 {
        self.current.version
    }

    /// Replace the whole snapshot, bumping the version
    pub fn replace(&mut self, mut next: RiskLimitConfig) -> u64 {
        next.version = self.current.version + 1;
        let version = next.version;
        self.current = Arc::new(next);
        version
    }

    /// Scale one strategy's limits by `factor`, clamped into its safety
    /// bounds. Returns the new snapshot version, or `None` when the
    /// strategy has no configured limits.
    pub fn apply_adjustment(&mut self, kind: StrategyKind, factor: Decimal) -> Option<u64> {
        let limits = *self.current.strategy(kind)?;
        let bounds = *self.current.bounds_for(kind)?;
        let mut next = (*self.current).clone();
        next.strategies.insert(kind, limits.scaled(factor, &bounds));
        Some(self.replace(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_clamps_both_ends() {
        let bound = Bound::new(dec!(0.05), dec!(0.25));
        assert_eq!(bound.clamp(dec!(0.01)), dec!(0.05));
        assert_eq!(bound.clamp(dec!(0.10)), dec!(0.10));
        assert_eq!(bound.clamp(dec!(0.40)), dec!(0.25));
    }

    #[test]
    fn test_defaults_cover_every_strategy() {
        let config = RiskLimitConfig::default();
        for kind in StrategyKind::ALL {
            assert!(config.strategy(kind).is_some(), "missing limits for {kind}");
            assert!(config.bounds_for(kind).is_some(), "missing bounds for {kind}");
        }
    }

    #[test]
    fn test_trailing_only_on_trend_strategies() {
        let config = RiskLimitConfig::default();
        for kind in StrategyKind::ALL {
            let has_trailing = config.strategy(kind).and_then(|l| l.trailing).is_some();
            let expected = matches!(
                kind,
                StrategyKind::TrendFollowing | StrategyKind::HighTimeframe
            );
            assert_eq!(has_trailing, expected, "trailing mismatch for {kind}");
        }
    }

    #[test]
    fn test_static_stop_sides() {
        let limits = StrategyLimits::defaults_for(StrategyKind::TrendFollowing);
        // 100 * (1 - 0.01) = 99
        assert_eq!(limits.static_stop(Side::Long, dec!(100)), dec!(99.00));
        // 100 * (1 + 0.01) = 101
        assert_eq!(limits.static_stop(Side::Short, dec!(100)), dec!(101.00));
    }

    #[test]
    fn test_replace_bumps_version() {
        let mut registry = RiskLimitRegistry::new(RiskLimitConfig::default());
        assert_eq!(registry.version(), 1);
        let v = registry.replace(RiskLimitConfig::default());
        assert_eq!(v, 2);
        assert_eq!(registry.snapshot().version, 2);
    }

    #[test]
    fn test_adjustment_tightens_within_bounds() {
        let mut registry = RiskLimitRegistry::new(RiskLimitConfig::default());
        let before = registry.snapshot();
        registry.apply_adjustment(StrategyKind::TrendFollowing, dec!(0.90));

        let after = registry.snapshot();
        let limits = after.strategy(StrategyKind::TrendFollowing).unwrap();
        // 0.15 * 0.90 = 0.135
        assert_eq!(limits.max_position_pct, dec!(0.135));
        assert_eq!(after.version, before.version + 1);
    }

    #[test]
    fn test_adjustment_clamped_at_safety_floor() {
        let mut registry = RiskLimitRegistry::new(RiskLimitConfig::default());
        // Repeated tightening cannot pass the 0.05 floor.
        for _ in 0..20 {
            registry.apply_adjustment(StrategyKind::TrendFollowing, dec!(0.50));
        }
        let limits = registry
            .snapshot()
            .strategy(StrategyKind::TrendFollowing)
            .copied()
            .unwrap();
        assert_eq!(limits.max_position_pct, dec!(0.05));
        assert_eq!(limits.max_leverage, dec!(1.0));
    }

    #[test]
    fn test_old_snapshots_stay_valid_after_replace() {
        let mut registry = RiskLimitRegistry::new(RiskLimitConfig::default());
        let old = registry.snapshot();
        registry.apply_adjustment(StrategyKind::Arbitrage, dec!(0.90));
        assert_eq!(old.version, 1);
        assert_eq!(
            old.strategy(StrategyKind::Arbitrage).unwrap().max_position_pct,
            dec!(0.05)
        );
    }
}
