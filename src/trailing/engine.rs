//! Trailing stop engine

use super::types::{CloseReason, StopAction, StopPhase, TrailingError, TrailingStop, TrailingSummary};
use crate::ledger::{Position, PositionId, Side};
use crate::limits::TrailingParams;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Drives one trailing-stop state machine per protected position.
///
/// The engine is price-driven and side-aware: favorable moves ratchet
/// the stop toward the market, adverse moves never loosen it, and a
/// crossed stop emits a close instruction exactly once.
#[derive(Debug, Default)]
pub struct TrailingStopEngine {
    stops: HashMap<PositionId, TrailingStop>,
}

impl TrailingStopEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start protecting a position. The stop begins at the strategy's
    /// static stop-loss and trails only once profit reaches the
    /// activation threshold.
    pub fn register(
        &mut self,
        position: &Position,
        params: TrailingParams,
        static_stop: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), TrailingError> {
        if self.stops.contains_key(&position.id) {
            return Err(TrailingError::DuplicateStop(position.id.clone()));
        }
        if static_stop <= Decimal::ZERO {
            return Err(TrailingError::InvalidPrice {
                position_id: position.id.clone(),
                price: static_stop,
            });
        }
        let stop = TrailingStop {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            strategy: position.strategy,
            side: position.side,
            entry_price: position.entry_price,
            best_price: position.entry_price,
            stop_price: static_stop,
            phase: StopPhase::PendingActivation,
            params,
            last_adjusted: now,
        };
        debug!(
            position_id = %stop.position_id,
            symbol = %stop.symbol,
            stop_price = %stop.stop_price,
            "Registered trailing stop"
        );
        self.stops.insert(position.id.clone(), stop);
        Ok(())
    }

    /// Advance one stop's state machine with a new price.
    ///
    /// Returns the action to publish, if any. A crossed stop wins over
    /// any adjustment from the same tick.
    pub fn on_price(
        &mut self,
        position_id: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<StopAction>, TrailingError> {
        if price <= Decimal::ZERO {
            return Err(TrailingError::InvalidPrice {
                position_id: position_id.to_string(),
                price,
            });
        }
        let stop = self
            .stops
            .get_mut(position_id)
            .ok_or_else(|| TrailingError::UnknownPosition(position_id.to_string()))?;
        if stop.phase.is_terminal() {
            return Ok(None);
        }

        if stop.crossed_by(price) {
            let reason = match stop.phase {
                StopPhase::PendingActivation => CloseReason::StaticStop,
                _ => CloseReason::TrailingStop,
            };
            stop.phase = StopPhase::Triggered;
            stop.last_adjusted = now;
            info!(
                position_id = %stop.position_id,
                symbol = %stop.symbol,
                price = %price,
                stop_price = %stop.stop_price,
                ?reason,
                "Stop triggered"
            );
            return Ok(Some(StopAction::Close {
                position_id: stop.position_id.clone(),
                stop_price: stop.stop_price,
                reason,
            }));
        }

        match stop.side {
            Side::Long if price > stop.best_price => stop.best_price = price,
            Side::Short if price < stop.best_price => stop.best_price = price,
            _ => {}
        }

        let profit = stop.profit_fraction(price);
        if stop.phase == StopPhase::PendingActivation && profit >= stop.params.activation_threshold
        {
            stop.phase = StopPhase::Active;
            debug!(position_id = %stop.position_id, profit = %profit, "Trailing stop activated");
        }
        if stop.phase == StopPhase::Active && profit >= stop.params.tighten_at {
            stop.phase = StopPhase::Tightening;
            debug!(position_id = %stop.position_id, profit = %profit, "Trailing distance tightened");
        }

        if matches!(stop.phase, StopPhase::Active | StopPhase::Tightening) {
            let distance = stop.effective_distance();
            let candidate = match stop.side {
                Side::Long => stop.best_price * (Decimal::ONE - distance),
                Side::Short => stop.best_price * (Decimal::ONE + distance),
            };
            let improved = match stop.side {
                Side::Long => candidate > stop.stop_price,
                Side::Short => candidate < stop.stop_price,
            };
            if improved {
                stop.stop_price = candidate;
                stop.last_adjusted = now;
                return Ok(Some(StopAction::UpdateStop {
                    position_id: stop.position_id.clone(),
                    new_stop_price: candidate,
                }));
            }
        }
        Ok(None)
    }

    /// Mark a stop closed after an external close instruction, so that
    /// in-flight prices cannot re-trigger it before the fill confirms.
    pub fn mark_closed(&mut self, position_id: &str) -> bool {
        match self.stops.get_mut(position_id) {
            Some(stop) => {
                stop.phase = StopPhase::Closed;
                true
            }
            None => false,
        }
    }

    /// Drop a stop once its position is gone from the ledger
    pub fn remove(&mut self, position_id: &str) -> Option<TrailingStop> {
        self.stops.remove(position_id)
    }

    pub fn get(&self, position_id: &str) -> Option<&TrailingStop> {
        self.stops.get(position_id)
    }

    /// Stops currently trailing (active or tightening)
    pub fn active_count(&self) -> usize {
        self.stops
            .values()
            .filter(|s| matches!(s.phase, StopPhase::Active | StopPhase::Tightening))
            .count()
    }

    /// Phase counts across all tracked stops
    pub fn summary(&self) -> TrailingSummary {
        let mut summary = TrailingSummary {
            total: self.stops.len(),
            ..TrailingSummary::default()
        };
        for stop in self.stops.values() {
            match stop.phase {
                StopPhase::PendingActivation => summary.pending_activation += 1,
                StopPhase::Active => summary.active += 1,
                StopPhase::Tightening => summary.tightening += 1,
                StopPhase::Triggered => summary.triggered += 1,
                StopPhase::Closed => {}
            }
        }
        summary
    }

    /// Remove stops that no ledger position backs and that have not
    /// moved within the retention window. Returns how many were removed.
    pub fn cleanup_stale(
        &mut self,
        live: &HashSet<PositionId>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> usize {
        let before = self.stops.len();
        self.stops
            .retain(|id, stop| live.contains(id) || now - stop.last_adjusted < retention);
        before - self.stops.len()
    }

    /// Detached copy of all stops for checkpointing
    pub fn snapshot(&self) -> Vec<TrailingStop> {
        self.stops.values().cloned().collect()
    }

    /// Reload stops from a checkpoint. Every stop is revalidated; a
    /// stop that fails its invariants is discarded instead of armed,
    /// and its id is returned so the caller can freeze the backing
    /// position.
    pub fn restore(&mut self, stops: Vec<TrailingStop>) -> Vec<PositionId> {
        let mut violations = Vec::new();
        for stop in stops {
            if let Err(err) = stop.validate() {
                tracing::warn!(position_id = %stop.position_id, %err, "Discarding restored stop, invariants violated");
                violations.push(stop.position_id);
                continue;
            }
            self.stops.insert(stop.position_id.clone(), stop);
        }
        violations
    }
}
