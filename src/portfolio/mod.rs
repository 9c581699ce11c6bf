//! Portfolio performance module
//!
//! Daily and weekly P&L windows over the position ledger, with
//! warning/breach grading against the configured loss limits.

mod tracker;
mod types;

pub use tracker::PortfolioPerformanceTracker;
pub use types::{PerformanceReport, PerformanceStatus, PnlWindow, WeeklyCheckpoint};
