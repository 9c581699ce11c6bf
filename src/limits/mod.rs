//! Risk limit module
//!
//! Strategy-specific and portfolio-wide limit configuration, and the
//! adaptive tuner that tightens or relaxes limits inside safety bounds.

mod dynamic;
mod registry;

pub use dynamic::{AdaptivePolicy, AdjustmentKind, DynamicRiskLimits, LimitAdjustment};
pub use registry::{
    Bound, PortfolioLimits, RiskLimitConfig, RiskLimitRegistry, SafetyBounds, StrategyLimits,
    TrailingParams,
};
