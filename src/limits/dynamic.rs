//! Adaptive limit tuning

use crate::ledger::StrategyKind;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Thresholds governing when limits tighten or relax; absent fields
/// keep the built-in defaults
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptivePolicy {
    /// Near-breaches before a tighten fires
    #[serde(default = "default_tighten_after")]
    pub tighten_after: u32,
    /// Compliant validations before a relax fires
    #[serde(default = "default_loosen_after")]
    pub loosen_after: u32,
    /// Fractional step applied per adjustment
    #[serde(default = "default_adjust_step")]
    pub adjust_step: Decimal,
    /// Utilization fraction counted as a near-breach
    #[serde(default = "default_near_breach_ratio")]
    pub near_breach_ratio: Decimal,
}

fn default_tighten_after() -> u32 {
    AdaptivePolicy::default().tighten_after
}
fn default_loosen_after() -> u32 {
    AdaptivePolicy::default().loosen_after
}
fn default_adjust_step() -> Decimal {
    AdaptivePolicy::default().adjust_step
}
fn default_near_breach_ratio() -> Decimal {
    AdaptivePolicy::default().near_breach_ratio
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            tighten_after: 3,
            loosen_after: 20,
            adjust_step: dec!(0.10),
            near_breach_ratio: dec!(0.90),
        }
    }
}

/// Direction of a limit adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Tighten,
    Relax,
}

/// One adjustment recommendation for the limit registry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitAdjustment {
    pub strategy: StrategyKind,
    pub kind: AdjustmentKind,
    /// Multiplier to apply to the strategy's adjustable limits
    pub factor: Decimal,
}

/// Tracks per-strategy validation outcomes and recommends limit
/// adjustments once the policy thresholds trip.
///
/// Recommendations are advisory: the registry clamps every applied
/// factor into the strategy's safety bounds.
#[derive(Debug)]
pub struct DynamicRiskLimits {
    policy: AdaptivePolicy,
    near_breaches: HashMap<StrategyKind, u32>,
    compliant_streak: HashMap<StrategyKind, u32>,
}

impl DynamicRiskLimits {
    pub fn new(policy: AdaptivePolicy) -> Self {
        Self {
            policy,
            near_breaches: HashMap::new(),
            compliant_streak: HashMap::new(),
        }
    }

    /// Record one validation outcome.
    ///
    /// `utilization` is the highest limit utilization across the
    /// proposal's checks (1.0 means exactly at a limit). Rejections and
    /// near-breaches count toward tightening; clean approvals count
    /// toward relaxation. Returns an adjustment when a threshold trips,
    /// resetting that strategy's counters.
    pub fn observe(
        &mut self,
        strategy: StrategyKind,
        utilization: Decimal,
        approved: bool,
    ) -> Option<LimitAdjustment> {
        let near_breach = !approved || utilization >= self.policy.near_breach_ratio;
        if near_breach {
            self.compliant_streak.insert(strategy, 0);
            let count = self.near_breaches.entry(strategy).or_insert(0);
            *count += 1;
            if *count >= self.policy.tighten_after {
                *count = 0;
                return Some(LimitAdjustment {
                    strategy,
                    kind: AdjustmentKind::Tighten,
                    factor: Decimal::ONE - self.policy.adjust_step,
                });
            }
        } else {
            self.near_breaches.insert(strategy, 0);
            let streak = self.compliant_streak.entry(strategy).or_insert(0);
            *streak += 1;
            if *streak >= self.policy.loosen_after {
                *streak = 0;
                return Some(LimitAdjustment {
                    strategy,
                    kind: AdjustmentKind::Relax,
                    factor: Decimal::ONE + self.policy.adjust_step,
                });
            }
        }
        None
    }

    /// Relax one step across all strategies after the weekly profit
    /// target is hit. Counters reset so the relaxation is not undone by
    /// a stale tighten streak.
    pub fn on_weekly_achievement(&mut self) -> Vec<LimitAdjustment> {
        self.near_breaches.clear();
        self.compliant_streak.clear();
        StrategyKind::ALL
            .iter()
            .map(|&strategy| LimitAdjustment {
                strategy,
                kind: AdjustmentKind::Relax,
                factor: Decimal::ONE + self.policy.adjust_step,
            })
            .collect()
    }

    /// Near-breach count currently accumulated for a strategy
    pub fn near_breach_count(&self, strategy: StrategyKind) -> u32 {
        self.near_breaches.get(&strategy).copied().unwrap_or(0)
    }
}
