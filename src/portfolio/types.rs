//! Portfolio performance types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Daily loss standing, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    Normal,
    Warning,
    Breach,
}

/// One rolling measurement window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlWindow {
    /// Balance the window was re-based from
    pub start_balance: Decimal,
    /// Window anchor time
    pub started_at: DateTime<Utc>,
    /// Highest balance observed inside the window
    pub high_water: Decimal,
    /// Lowest balance observed inside the window
    pub low_water: Decimal,
}

impl PnlWindow {
    pub fn new(balance: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            start_balance: balance,
            started_at: at,
            high_water: balance,
            low_water: balance,
        }
    }

    /// Update the water marks with the latest balance
    pub fn observe(&mut self, balance: Decimal) {
        if balance > self.high_water {
            self.high_water = balance;
        }
        if balance < self.low_water {
            self.low_water = balance;
        }
    }

    /// Signed P&L fraction of `balance` relative to the window start
    pub fn pnl_fraction(&self, balance: Decimal) -> Decimal {
        if self.start_balance.is_zero() {
            return Decimal::ZERO;
        }
        (balance - self.start_balance) / self.start_balance
    }
}

/// Weekly window state persisted across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyCheckpoint {
    pub window: PnlWindow,
    /// Whether the achievement event already fired this window
    pub achievement_fired: bool,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub status: PerformanceStatus,
    /// Recomputed account balance
    pub balance: Decimal,
    /// Signed daily P&L fraction
    pub daily_pnl_pct: Decimal,
    /// Signed weekly P&L fraction
    pub weekly_pnl_pct: Decimal,
    pub daily_high_water: Decimal,
    pub daily_low_water: Decimal,
    pub weekly_high_water: Decimal,
    pub weekly_low_water: Decimal,
    /// Weekly target reached on this evaluation (fires once per window)
    pub weekly_achievement: bool,
    /// Daily window rolled over on this evaluation
    pub daily_reset: bool,
    /// Weekly window rolled over on this evaluation
    pub weekly_reset: bool,
}
