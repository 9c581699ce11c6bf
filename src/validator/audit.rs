//! Validation audit records

use super::Decision;
use crate::ledger::StrategyKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One evaluated limit check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitCheck {
    pub name: String,
    pub passed: bool,
    /// Value the proposal evaluated to, absent for state-only checks
    pub evaluated: Option<Decimal>,
    /// Limit it was compared against
    pub limit: Option<Decimal>,
    pub message: String,
}

impl LimitCheck {
    pub fn new(
        name: &str,
        passed: bool,
        evaluated: Option<Decimal>,
        limit: Option<Decimal>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            passed,
            evaluated,
            limit,
            message: message.into(),
        }
    }

    /// Fraction of the limit this check consumed
    pub fn utilization(&self) -> Option<Decimal> {
        match (self.evaluated, self.limit) {
            (Some(evaluated), Some(limit)) if limit > Decimal::ZERO => Some(evaluated / limit),
            _ => None,
        }
    }
}

/// Full record of one validation decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationAudit {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub proposal_id: String,
    pub symbol: String,
    pub strategy: StrategyKind,
    /// Checks evaluated before the decision, in order
    pub checks: Vec<LimitCheck>,
    pub decision: Decision,
}

impl ValidationAudit {
    pub fn approved(&self) -> bool {
        !matches!(self.decision, Decision::Rejected { .. })
    }

    /// Highest limit utilization across the evaluated checks
    pub fn max_utilization(&self) -> Decimal {
        self.checks
            .iter()
            .filter_map(LimitCheck::utilization)
            .max()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Running decision counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidatorStats {
    pub proposals: u64,
    pub approved: u64,
    pub rejected: u64,
    pub conditional: u64,
}

impl ValidatorStats {
    pub fn record(&mut self, decision: &Decision) {
        self.proposals += 1;
        match decision {
            Decision::Approved => self.approved += 1,
            Decision::Rejected { .. } => self.rejected += 1,
            Decision::Conditional { .. } => self.conditional += 1,
        }
    }
}
