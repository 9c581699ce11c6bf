//! Portfolio performance tracker

use super::types::{PerformanceReport, PerformanceStatus, PnlWindow, WeeklyCheckpoint};
use crate::ledger::LedgerTotals;
use crate::limits::PortfolioLimits;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::info;

/// Grades portfolio P&L against the daily loss limits and the weekly
/// reward target.
///
/// Every evaluation recomputes the balance from the ledger totals;
/// nothing is accumulated between calls, so a missed evaluation can
/// never skew the result. Windows re-base from the live balance when
/// they roll over.
#[derive(Debug)]
pub struct PortfolioPerformanceTracker {
    initial_balance: Decimal,
    warning_loss_pct: Decimal,
    max_daily_loss_pct: Decimal,
    weekly_target_pct: Decimal,
    daily: PnlWindow,
    weekly: PnlWindow,
    achievement_fired: bool,
}

impl PortfolioPerformanceTracker {
    pub fn new(limits: &PortfolioLimits, now: DateTime<Utc>) -> Self {
        Self {
            initial_balance: limits.initial_balance,
            warning_loss_pct: limits.warning_loss_pct,
            max_daily_loss_pct: limits.max_daily_loss_pct,
            weekly_target_pct: limits.weekly_target_pct,
            daily: PnlWindow::new(limits.initial_balance, now),
            weekly: PnlWindow::new(limits.initial_balance, now),
            achievement_fired: false,
        }
    }

    /// Evaluate the portfolio against the loss limits.
    ///
    /// Balance is recomputed from scratch: initial balance plus total
    /// realized and unrealized P&L. Window rollovers happen first so a
    /// new day never inherits yesterday's losses.
    pub fn evaluate(&mut self, totals: &LedgerTotals, now: DateTime<Utc>) -> PerformanceReport {
        let balance = self.initial_balance + totals.realized_pnl + totals.unrealized_pnl;

        let daily_reset = now.date_naive() != self.daily.started_at.date_naive();
        if daily_reset {
            info!(balance = %balance, "Daily window rolled over");
            self.daily = PnlWindow::new(balance, now);
        }

        let mut weekly_reset = false;
        let mut anchor = self.weekly.started_at;
        while now - anchor >= Duration::days(7) {
            anchor += Duration::days(7);
            weekly_reset = true;
        }
        if weekly_reset {
            info!(balance = %balance, "Weekly window rolled over");
            self.weekly = PnlWindow::new(balance, anchor);
            self.achievement_fired = false;
        }

        self.daily.observe(balance);
        self.weekly.observe(balance);

        let daily_pnl_pct = self.daily.pnl_fraction(balance);
        let weekly_pnl_pct = self.weekly.pnl_fraction(balance);

        let status = if daily_pnl_pct <= -self.max_daily_loss_pct {
            PerformanceStatus::Breach
        } else if daily_pnl_pct <= -self.warning_loss_pct {
            PerformanceStatus::Warning
        } else {
            PerformanceStatus::Normal
        };

        let weekly_achievement = !self.achievement_fired && weekly_pnl_pct >= self.weekly_target_pct;
        if weekly_achievement {
            self.achievement_fired = true;
            info!(weekly_pnl_pct = %weekly_pnl_pct, "Weekly reward target reached");
        }

        PerformanceReport {
            status,
            balance,
            daily_pnl_pct,
            weekly_pnl_pct,
            daily_high_water: self.daily.high_water,
            daily_low_water: self.daily.low_water,
            weekly_high_water: self.weekly.high_water,
            weekly_low_water: self.weekly.low_water,
            weekly_achievement,
            daily_reset,
            weekly_reset,
        }
    }

    /// Daily window state for checkpointing
    pub fn daily_checkpoint(&self) -> &PnlWindow {
        &self.daily
    }

    /// Weekly window state for checkpointing
    pub fn weekly_checkpoint(&self) -> WeeklyCheckpoint {
        WeeklyCheckpoint {
            window: self.weekly.clone(),
            achievement_fired: self.achievement_fired,
        }
    }

    /// Reload window state from checkpoints, keeping fresh windows for
    /// whichever checkpoint is missing.
    pub fn restore(&mut self, daily: Option<PnlWindow>, weekly: Option<WeeklyCheckpoint>) {
        if let Some(window) = daily {
            self.daily = window;
        }
        if let Some(checkpoint) = weekly {
            self.weekly = checkpoint.window;
            self.achievement_fired = checkpoint.achievement_fired;
        }
    }
}
