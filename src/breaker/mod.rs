//! Trading circuit breaker
//!
//! Global safety switch: opens on a daily loss breach or a near-breach
//! storm, halts all trade approval while open, and recovers through a
//! probation phase on a scheduled reset or an authorized override.

use crate::clock::next_midnight;
use crate::ledger::StrategyKind;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{info, warn};

/// Breaker state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Trading halted
    Open,
    /// Probation after a reset; a breach re-opens immediately
    Recovering,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::Recovering => "recovering",
        };
        write!(f, "{s}")
    }
}

/// What tripped the breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TripCause {
    /// Daily loss ceiling breached
    DailyLossBreach { loss_pct: Decimal },
    /// A strategy kept validating at the edge of its limits even after
    /// repeated tightening
    NearBreachStorm { strategy: StrategyKind, tightens: u32 },
}

/// Why a transition happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionReason {
    Tripped { cause: TripCause },
    ScheduledReset,
    ProbationComplete,
    ManualOverride { identity: String, reason: String },
}

/// One recorded state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerTransition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub at: DateTime<Utc>,
    pub reason: TransitionReason,
}

/// Manual override request from the overrides topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub authorized_identity: String,
    pub reason: String,
}

/// Published breaker status, also embedded in the portfolio summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub cause: Option<TripCause>,
    pub opened_at: Option<DateTime<Utc>>,
    pub scheduled_reset_at: Option<DateTime<Utc>>,
    pub trip_count: u64,
}

/// Breaker tuning; absent fields keep the built-in defaults
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BreakerConfig {
    /// Clean minutes in Recovering before the breaker closes
    #[serde(default = "default_probation_minutes")]
    pub probation_minutes: i64,
    /// Re-opening within this window of the last open counts as a flap
    #[serde(default = "default_flap_window_minutes")]
    pub flap_window_minutes: i64,
    /// Open-duration multiplier applied per consecutive flap
    #[serde(default = "default_flap_penalty_factor")]
    pub flap_penalty_factor: i32,
    /// Ceiling on any extended open duration
    #[serde(default = "default_max_open_hours")]
    pub max_open_hours: i64,
    /// Most recent transitions retained for audit
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Identities allowed to manually override an open breaker
    #[serde(default)]
    pub authorized_identities: Vec<String>,
}

fn default_probation_minutes() -> i64 {
    BreakerConfig::default().probation_minutes
}
fn default_flap_window_minutes() -> i64 {
    BreakerConfig::default().flap_window_minutes
}
fn default_flap_penalty_factor() -> i32 {
    BreakerConfig::default().flap_penalty_factor
}
fn default_max_open_hours() -> i64 {
    BreakerConfig::default().max_open_hours
}
fn default_history_limit() -> usize {
    BreakerConfig::default().history_limit
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            probation_minutes: 30,
            flap_window_minutes: 60,
            flap_penalty_factor: 2,
            max_open_hours: 72,
            history_limit: 50,
            authorized_identities: Vec::new(),
        }
    }
}

/// Breaker errors
#[derive(Debug, Error, PartialEq)]
pub enum BreakerError {
    #[error("breaker is {0}, override applies only while open")]
    NotOpen(BreakerState),
    #[error("identity {0} is not authorized to override the breaker")]
    Unauthorized(String),
}

/// Serialized breaker state for the StateStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerCheckpoint {
    pub state: BreakerState,
    pub cause: Option<TripCause>,
    pub opened_at: Option<DateTime<Utc>>,
    pub scheduled_reset_at: Option<DateTime<Utc>>,
    pub recovering_since: Option<DateTime<Utc>>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub consecutive_flaps: u32,
    pub trip_count: u64,
    pub history: Vec<BreakerTransition>,
}

/// The trading circuit breaker.
///
/// Transitions are driven by explicit calls, never by timers: the
/// coordinator's health sweep calls [`check_recovery`] with the current
/// time. Concurrent breach signals collapse to a single Open transition
/// with the first cause recorded.
///
/// [`check_recovery`]: CircuitBreaker::check_recovery
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    cause: Option<TripCause>,
    opened_at: Option<DateTime<Utc>>,
    scheduled_reset_at: Option<DateTime<Utc>>,
    recovering_since: Option<DateTime<Utc>>,
    last_opened_at: Option<DateTime<Utc>>,
    consecutive_flaps: u32,
    trip_count: u64,
    history: VecDeque<BreakerTransition>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            cause: None,
            opened_at: None,
            scheduled_reset_at: None,
            recovering_since: None,
            last_opened_at: None,
            consecutive_flaps: 0,
            trip_count: 0,
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether trade approval is halted
    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            state: self.state,
            cause: self.cause.clone(),
            opened_at: self.opened_at,
            scheduled_reset_at: self.scheduled_reset_at,
            trip_count: self.trip_count,
        }
    }

    /// Open the breaker. Idempotent: a trip while already open records
    /// nothing and returns `None`.
    ///
    /// The scheduled reset is the start of the next trading day. A trip
    /// that follows a recent open (flapping) multiplies the open
    /// duration by the penalty factor per consecutive flap, capped at
    /// the configured maximum.
    pub fn trip(&mut self, cause: TripCause, now: DateTime<Utc>) -> Option<BreakerTransition> {
        if self.state == BreakerState::Open {
            return None;
        }
        let flapping = self.state == BreakerState::Recovering
            || self
                .last_opened_at
                .is_some_and(|t| now - t <= Duration::minutes(self.config.flap_window_minutes));
        if flapping {
            self.consecutive_flaps += 1;
        } else {
            self.consecutive_flaps = 0;
        }

        let mut duration = next_midnight(now) - now;
        let cap = Duration::hours(self.config.max_open_hours);
        for _ in 0..self.consecutive_flaps {
            duration = duration * self.config.flap_penalty_factor;
            if duration >= cap {
                duration = cap;
                break;
            }
        }

        let from = self.state;
        self.state = BreakerState::Open;
        self.cause = Some(cause.clone());
        self.opened_at = Some(now);
        self.last_opened_at = Some(now);
        self.scheduled_reset_at = Some(now + duration);
        self.recovering_since = None;
        self.trip_count += 1;
        warn!(
            ?cause,
            flaps = self.consecutive_flaps,
            scheduled_reset_at = ?self.scheduled_reset_at,
            "Circuit breaker opened, all trading suspended"
        );
        Some(self.record(from, BreakerState::Open, now, TransitionReason::Tripped { cause }))
    }

    /// Advance time-based recovery. Called on the health cadence.
    ///
    /// Open moves to Recovering once the scheduled reset passes;
    /// Recovering moves to Closed after a clean probation interval.
    pub fn check_recovery(&mut self, now: DateTime<Utc>) -> Option<BreakerTransition> {
        match self.state {
            BreakerState::Open => {
                let due = self.scheduled_reset_at.is_some_and(|t| now >= t);
                if !due {
                    return None;
                }
                self.state = BreakerState::Recovering;
                self.recovering_since = Some(now);
                info!("Circuit breaker entering recovery probation");
                Some(self.record(
                    BreakerState::Open,
                    BreakerState::Recovering,
                    now,
                    TransitionReason::ScheduledReset,
                ))
            }
            BreakerState::Recovering => {
                let probation = Duration::minutes(self.config.probation_minutes);
                let done = self.recovering_since.is_some_and(|t| now - t >= probation);
                if !done {
                    return None;
                }
                self.state = BreakerState::Closed;
                self.cause = None;
                self.opened_at = None;
                self.scheduled_reset_at = None;
                self.recovering_since = None;
                info!("Circuit breaker closed, trading resumed");
                Some(self.record(
                    BreakerState::Recovering,
                    BreakerState::Closed,
                    now,
                    TransitionReason::ProbationComplete,
                ))
            }
            BreakerState::Closed => None,
        }
    }

    /// Apply an authorized manual override to an open breaker, moving it
    /// into Recovering. Identity and reason are recorded in the history.
    pub fn manual_override(
        &mut self,
        request: &OverrideRequest,
        now: DateTime<Utc>,
    ) -> Result<BreakerTransition, BreakerError> {
        if self.state != BreakerState::Open {
            return Err(BreakerError::NotOpen(self.state));
        }
        if !self
            .config
            .authorized_identities
            .iter()
            .any(|id| id == &request.authorized_identity)
        {
            warn!(identity = %request.authorized_identity, "Rejected unauthorized breaker override");
            return Err(BreakerError::Unauthorized(
                request.authorized_identity.clone(),
            ));
        }
        self.state = BreakerState::Recovering;
        self.recovering_since = Some(now);
        info!(
            identity = %request.authorized_identity,
            reason = %request.reason,
            "Circuit breaker manually overridden into recovery"
        );
        Ok(self.record(
            BreakerState::Open,
            BreakerState::Recovering,
            now,
            TransitionReason::ManualOverride {
                identity: request.authorized_identity.clone(),
                reason: request.reason.clone(),
            },
        ))
    }

    /// Most recent transitions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &BreakerTransition> {
        self.history.iter()
    }

    pub fn trip_count(&self) -> u64 {
        self.trip_count
    }

    /// Full state for the StateStore
    pub fn checkpoint(&self) -> BreakerCheckpoint {
        BreakerCheckpoint {
            state: self.state,
            cause: self.cause.clone(),
            opened_at: self.opened_at,
            scheduled_reset_at: self.scheduled_reset_at,
            recovering_since: self.recovering_since,
            last_opened_at: self.last_opened_at,
            consecutive_flaps: self.consecutive_flaps,
            trip_count: self.trip_count,
            history: self.history.iter().cloned().collect(),
        }
    }

    /// Reload breaker state from a checkpoint
    pub fn restore(&mut self, checkpoint: BreakerCheckpoint) {
        self.state = checkpoint.state;
        self.cause = checkpoint.cause;
        self.opened_at = checkpoint.opened_at;
        self.scheduled_reset_at = checkpoint.scheduled_reset_at;
        self.recovering_since = checkpoint.recovering_since;
        self.last_opened_at = checkpoint.last_opened_at;
        self.consecutive_flaps = checkpoint.consecutive_flaps;
        self.trip_count = checkpoint.trip_count;
        self.history = checkpoint.history.into();
        self.history.truncate(self.config.history_limit);
    }

    fn record(
        &mut self,
        from: BreakerState,
        to: BreakerState,
        at: DateTime<Utc>,
        reason: TransitionReason,
    ) -> BreakerTransition {
        let transition = BreakerTransition { from, to, at, reason };
        self.history.push_back(transition.clone());
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        transition
    }
}
