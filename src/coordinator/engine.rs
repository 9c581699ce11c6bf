//! Event loop wiring the risk modules to the bus and the state store

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::breaker::{
    BreakerCheckpoint, BreakerConfig, BreakerTransition, CircuitBreaker, OverrideRequest, TripCause,
};
use crate::bus::{topics, MessageBus};
use crate::clock::Clock;
use crate::coordinator::events::{PortfolioSummary, RiskAlert, RiskEvent};
use crate::ledger::{
    CloseConfirmation, FillEvent, LedgerError, OpenConfirmation, PositionId, PositionLedger,
    PriceUpdate, StrategyKind,
};
use crate::limits::{
    AdaptivePolicy, AdjustmentKind, DynamicRiskLimits, RiskLimitConfig, RiskLimitRegistry,
};
use crate::portfolio::{
    PerformanceStatus, PnlWindow, PortfolioPerformanceTracker, WeeklyCheckpoint,
};
use crate::store::{keys, PendingWrite, RetryQueue, StateStore};
use crate::telemetry::metrics;
use crate::trailing::{CloseReason, StopAction, TrailingStop, TrailingStopEngine};
use crate::validator::{CorrelationMap, RiskValidator, TradeProposal};

/// Cadence and plumbing knobs for the coordinator loop
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Portfolio evaluation sweep
    pub fast_interval: Duration,
    /// Aggregation, summary publish, and checkpoint sweep
    pub mid_interval: Duration,
    /// Breaker recovery, stale-stop cleanup, and retry drain
    pub health_interval: Duration,
    /// Orphaned stops older than this are dropped by the health sweep
    pub stale_stop_retention_hours: i64,
    /// Inbound event channel capacity
    pub event_buffer: usize,
    /// Consecutive tighten adjustments on one strategy before the
    /// breaker trips on a near-breach storm
    pub storm_tighten_trips: u32,
    /// Retry queue capacity for failed store writes and publishes
    pub retry_capacity: usize,
    /// First retry backoff in seconds, doubled per consecutive failure
    pub retry_base_backoff_secs: i64,
    /// Backoff ceiling in seconds
    pub retry_max_backoff_secs: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(60),
            mid_interval: Duration::from_secs(300),
            health_interval: Duration::from_secs(30),
            stale_stop_retention_hours: 24,
            event_buffer: 256,
            storm_tighten_trips: 3,
            retry_capacity: 1024,
            retry_base_backoff_secs: 5,
            retry_max_backoff_secs: 300,
        }
    }
}

/// Everything the coordinator needs to start
#[derive(Debug, Clone, Default)]
pub struct CoordinatorSettings {
    /// Loop cadence and plumbing
    pub cadence: CoordinatorConfig,
    /// Initial limit snapshot
    pub limits: RiskLimitConfig,
    /// Circuit breaker tuning
    pub breaker: BreakerConfig,
    /// Adaptive limit tuning policy
    pub adaptive: AdaptivePolicy,
    /// Symbol correlation groups for exposure checks
    pub correlation: CorrelationMap,
}

/// Mutable coordinator state behind one lock.
///
/// Handlers are synchronous and return the writes and publishes they
/// produced; all I/O happens outside the lock.
struct CoordinatorState {
    ledger: PositionLedger,
    stops: TrailingStopEngine,
    tracker: PortfolioPerformanceTracker,
    breaker: CircuitBreaker,
    registry: RiskLimitRegistry,
    adaptive: DynamicRiskLimits,
    validator: RiskValidator,
    retry: RetryQueue,
    /// Positions whose restored stop failed validation, awaiting their
    /// fill replay so the freeze can land on the booked position
    quarantined: HashSet<PositionId>,
    /// Consecutive tighten adjustments per strategy
    tighten_streaks: HashMap<StrategyKind, u32>,
    last_status: PerformanceStatus,
    storm_tighten_trips: u32,
}

impl CoordinatorState {
    fn new(settings: &CoordinatorSettings, now: DateTime<Utc>) -> Self {
        Self {
            ledger: PositionLedger::new(),
            stops: TrailingStopEngine::new(),
            tracker: PortfolioPerformanceTracker::new(&settings.limits.portfolio, now),
            breaker: CircuitBreaker::new(settings.breaker.clone()),
            registry: RiskLimitRegistry::new(settings.limits.clone()),
            adaptive: DynamicRiskLimits::new(settings.adaptive),
            validator: RiskValidator::new(settings.correlation.clone()),
            retry: RetryQueue::new(
                settings.cadence.retry_capacity,
                chrono::Duration::seconds(settings.cadence.retry_base_backoff_secs),
                chrono::Duration::seconds(settings.cadence.retry_max_backoff_secs),
            ),
            quarantined: HashSet::new(),
            tighten_streaks: HashMap::new(),
            last_status: PerformanceStatus::Normal,
            storm_tighten_trips: settings.cadence.storm_tighten_trips,
        }
    }

    /// Mark a position to market, run its trailing stop, and re-check
    /// the portfolio windows.
    fn on_price(&mut self, update: &PriceUpdate, now: DateTime<Utc>) -> Vec<PendingWrite> {
        let position = match self.ledger.apply_price(update) {
            Ok(position) => position,
            Err(LedgerError::UnknownPosition(id)) => {
                debug!(position_id = %id, "Price update for unknown position");
                return Vec::new();
            }
            Err(err) => {
                warn!(position_id = %update.position_id, %err, "Dropping price update");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        if !position.frozen && self.stops.get(&position.id).is_some() {
            match self.stops.on_price(&position.id, update.current_price, now) {
                Ok(Some(action)) => {
                    match &action {
                        StopAction::Close { stop_price, reason, .. } => {
                            metrics::stop_triggered();
                            info!(
                                position_id = %position.id,
                                stop_price = %stop_price,
                                ?reason,
                                "Stop triggered, closing position"
                            );
                        }
                        StopAction::UpdateStop { new_stop_price, .. } => {
                            metrics::stop_updated();
                            debug!(
                                position_id = %position.id,
                                new_stop_price = %new_stop_price,
                                "Stop moved"
                            );
                        }
                    }
                    let topic = action_topic(&action);
                    if let Some(payload) = encode(&action) {
                        out.push(PendingWrite::Publish {
                            topic: topic.to_string(),
                            payload,
                        });
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(position_id = %position.id, %err, "Trailing update failed"),
            }
        }

        out.extend(self.evaluate_portfolio(now));
        out
    }

    /// Validate a proposal, publish and persist the audit, and feed the
    /// outcome to the adaptive limit tuner.
    fn on_proposal(&mut self, proposal: &TradeProposal, now: DateTime<Utc>) -> Vec<PendingWrite> {
        let limits = self.registry.snapshot();
        let totals = self.ledger.totals();
        let balance = limits.portfolio.initial_balance + totals.realized_pnl + totals.unrealized_pnl;
        let open = self.ledger.snapshot();

        let started = std::time::Instant::now();
        let audit = self
            .validator
            .validate(proposal, &limits, self.breaker.state(), balance, &open, now);
        metrics::validation_seconds(started.elapsed().as_secs_f64());
        metrics::proposal_validated(&audit.decision);

        info!(
            audit_id = %audit.id,
            symbol = %audit.symbol,
            strategy = %audit.strategy,
            decision = ?audit.decision,
            "Proposal validated"
        );

        let mut out = Vec::new();
        if let Some(payload) = encode(&audit) {
            out.push(PendingWrite::Save {
                key: keys::audit(&audit.id),
                value: payload.clone(),
                ttl: keys::HOURLY_TTL,
            });
            out.push(PendingWrite::Publish {
                topic: topics::RISK_OUTPUT.to_string(),
                payload,
            });
        }

        let utilization = audit.max_utilization();
        if let Some(adjustment) = self
            .adaptive
            .observe(audit.strategy, utilization, audit.approved())
        {
            if let Some(version) = self
                .registry
                .apply_adjustment(adjustment.strategy, adjustment.factor)
            {
                info!(
                    strategy = %adjustment.strategy,
                    kind = ?adjustment.kind,
                    factor = %adjustment.factor,
                    version,
                    "Adaptive tuning adjusted strategy limits"
                );
                if let Some(payload) = encode(&RiskAlert::LimitsAdjusted {
                    strategy: adjustment.strategy,
                    kind: adjustment.kind,
                    factor: adjustment.factor,
                    version,
                }) {
                    out.push(PendingWrite::Publish {
                        topic: topics::RISK_ALERTS.to_string(),
                        payload,
                    });
                }
            }
            match adjustment.kind {
                AdjustmentKind::Tighten => {
                    let streak = self.tighten_streaks.entry(adjustment.strategy).or_insert(0);
                    *streak += 1;
                    if *streak >= self.storm_tighten_trips {
                        *streak = 0;
                        let cause = TripCause::NearBreachStorm {
                            strategy: adjustment.strategy,
                            tightens: self.storm_tighten_trips,
                        };
                        if let Some(transition) = self.breaker.trip(cause, now) {
                            error!(
                                strategy = %adjustment.strategy,
                                "Repeated near-breaches, tripping circuit breaker"
                            );
                            out.extend(self.breaker_opened_actions(
                                &transition,
                                CloseReason::CircuitBreaker,
                            ));
                        }
                    }
                }
                AdjustmentKind::Relax => {
                    self.tighten_streaks.insert(adjustment.strategy, 0);
                }
            }
        }
        out
    }

    fn on_fill(&mut self, fill: &FillEvent, now: DateTime<Utc>) -> Vec<PendingWrite> {
        match fill {
            FillEvent::Opened(confirmation) => self.on_open_fill(confirmation, now),
            FillEvent::Closed(confirmation) => self.on_close_fill(confirmation, now),
        }
    }

    /// Book an open fill and arm its trailing stop when the strategy
    /// trails. Fills that land while the breaker is open are closed
    /// straight back out.
    fn on_open_fill(
        &mut self,
        confirmation: &OpenConfirmation,
        now: DateTime<Utc>,
    ) -> Vec<PendingWrite> {
        let mut out = Vec::new();
        let position = match self.ledger.open_position(confirmation, now) {
            Ok(position) => position,
            Err(err) => {
                warn!(position_id = %confirmation.position_id, %err, "Dropping open confirmation");
                return out;
            }
        };
        metrics::position_opened();
        metrics::open_positions(self.ledger.open_count());
        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            strategy = %position.strategy,
            side = ?position.side,
            entry_price = %position.entry_price,
            size = %position.size,
            "Position opened"
        );

        if self.quarantined.contains(&position.id) {
            warn!(
                position_id = %position.id,
                "Replayed fill for a quarantined position, freezing pending review"
            );
            if let Err(err) = self.ledger.freeze(&position.id) {
                warn!(position_id = %position.id, %err, "Freeze on fill replay failed");
            }
            return out;
        }

        if self.breaker.is_open() {
            warn!(
                position_id = %position.id,
                "Fill arrived while the breaker is open, closing immediately"
            );
            let action = StopAction::Close {
                position_id: position.id.clone(),
                stop_price: position.entry_price,
                reason: CloseReason::CircuitBreaker,
            };
            if let Some(payload) = encode(&action) {
                out.push(PendingWrite::Publish {
                    topic: topics::EXECUTION.to_string(),
                    payload,
                });
            }
            return out;
        }

        let limits = self.registry.snapshot();
        if let Some(strategy_limits) = limits.strategy(position.strategy) {
            if let Some(params) = strategy_limits.trailing {
                let static_stop = strategy_limits.static_stop(position.side, position.entry_price);
                if let Err(err) = self.stops.register(&position, params, static_stop, now) {
                    warn!(position_id = %position.id, %err, "Trailing registration failed");
                } else {
                    metrics::active_stops(self.stops.active_count());
                }
            }
        }
        out
    }

    fn on_close_fill(
        &mut self,
        confirmation: &CloseConfirmation,
        now: DateTime<Utc>,
    ) -> Vec<PendingWrite> {
        let closed = match self.ledger.close_position(confirmation, now) {
            Ok(closed) => closed,
            Err(err) => {
                warn!(position_id = %confirmation.position_id, %err, "Dropping close confirmation");
                return Vec::new();
            }
        };
        self.stops.remove(&closed.position.id);
        self.quarantined.remove(&closed.position.id);
        metrics::position_closed();
        metrics::open_positions(self.ledger.open_count());
        metrics::active_stops(self.stops.active_count());
        info!(
            position_id = %closed.position.id,
            exit_price = %closed.exit_price,
            realized_pnl = %closed.realized_pnl,
            "Position closed"
        );
        self.evaluate_portfolio(now)
    }

    /// Apply a manual breaker override from an authorized operator.
    fn on_override(&mut self, request: &OverrideRequest, now: DateTime<Utc>) -> Vec<PendingWrite> {
        match self.breaker.manual_override(request, now) {
            Ok(transition) => {
                warn!(
                    identity = %request.authorized_identity,
                    reason = %request.reason,
                    "Manual breaker override accepted"
                );
                self.breaker_alert_actions(&transition)
            }
            Err(err) => {
                warn!(identity = %request.authorized_identity, %err, "Breaker override refused");
                Vec::new()
            }
        }
    }

    /// Re-evaluate the P&L windows and act on any status change.
    fn evaluate_portfolio(&mut self, now: DateTime<Utc>) -> Vec<PendingWrite> {
        let mut out = Vec::new();
        let report = self.tracker.evaluate(&self.ledger.totals(), now);
        metrics::daily_pnl(report.daily_pnl_pct);
        metrics::portfolio_balance(report.balance);

        let transitioned = report.status != self.last_status;
        if transitioned && report.status == PerformanceStatus::Warning {
            warn!(
                daily_pnl_pct = %report.daily_pnl_pct,
                balance = %report.balance,
                "Daily drawdown crossed the warning fraction"
            );
            if let Some(payload) = encode(&RiskAlert::DailyLossWarning {
                daily_pnl_pct: report.daily_pnl_pct,
                balance: report.balance,
            }) {
                out.push(PendingWrite::Publish {
                    topic: topics::RISK_ALERTS.to_string(),
                    payload,
                });
            }
        }

        if report.status == PerformanceStatus::Breach {
            let cause = TripCause::DailyLossBreach {
                loss_pct: -report.daily_pnl_pct,
            };
            if let Some(transition) = self.breaker.trip(cause, now) {
                error!(
                    daily_pnl_pct = %report.daily_pnl_pct,
                    "Daily loss limit breached, tripping circuit breaker"
                );
                out.extend(
                    self.breaker_opened_actions(&transition, CloseReason::DailyLossBreach),
                );
            }
        }

        if report.weekly_achievement {
            info!(
                weekly_pnl_pct = %report.weekly_pnl_pct,
                "Weekly reward target reached, relaxing limits"
            );
            if let Some(payload) = encode(&RiskAlert::WeeklyTargetAchieved {
                weekly_pnl_pct: report.weekly_pnl_pct,
            }) {
                out.push(PendingWrite::Publish {
                    topic: topics::RISK_ALERTS.to_string(),
                    payload,
                });
            }
            for adjustment in self.adaptive.on_weekly_achievement() {
                if let Some(version) = self
                    .registry
                    .apply_adjustment(adjustment.strategy, adjustment.factor)
                {
                    if let Some(payload) = encode(&RiskAlert::LimitsAdjusted {
                        strategy: adjustment.strategy,
                        kind: adjustment.kind,
                        factor: adjustment.factor,
                        version,
                    }) {
                        out.push(PendingWrite::Publish {
                            topic: topics::RISK_ALERTS.to_string(),
                            payload,
                        });
                    }
                }
            }
            self.tighten_streaks.clear();
        }

        if transitioned || report.daily_reset || report.weekly_reset || report.weekly_achievement {
            out.extend(self.window_checkpoint_actions());
        }
        self.last_status = report.status;
        out
    }

    /// Alert and checkpoint for a breaker transition, then order every
    /// open position closed.
    fn breaker_opened_actions(
        &mut self,
        transition: &BreakerTransition,
        reason: CloseReason,
    ) -> Vec<PendingWrite> {
        let mut out = self.breaker_alert_actions(transition);
        out.extend(self.close_all_positions(reason));
        out
    }

    fn breaker_alert_actions(&self, transition: &BreakerTransition) -> Vec<PendingWrite> {
        metrics::breaker_transition();
        metrics::breaker_state(self.breaker.state());
        let mut out = Vec::new();
        if let Some(payload) = encode(&RiskAlert::BreakerTransition {
            from: transition.from,
            to: transition.to,
            status: self.breaker.status(),
        }) {
            out.push(PendingWrite::Publish {
                topic: topics::RISK_ALERTS.to_string(),
                payload,
            });
        }
        if let Some(value) = encode(&self.breaker.checkpoint()) {
            out.push(PendingWrite::Save {
                key: keys::BREAKER_STATE.to_string(),
                value,
                ttl: keys::HOURLY_TTL,
            });
        }
        out
    }

    /// Issue close instructions for every open position at its current
    /// mark.
    fn close_all_positions(&mut self, reason: CloseReason) -> Vec<PendingWrite> {
        let positions = self.ledger.snapshot();
        if positions.is_empty() {
            return Vec::new();
        }
        warn!(
            count = positions.len(),
            ?reason,
            "Issuing close instructions for all open positions"
        );
        let mut out = Vec::new();
        for position in positions {
            self.stops.mark_closed(&position.id);
            let action = StopAction::Close {
                position_id: position.id.clone(),
                stop_price: position.current_price,
                reason,
            };
            if let Some(payload) = encode(&action) {
                out.push(PendingWrite::Publish {
                    topic: topics::EXECUTION.to_string(),
                    payload,
                });
            }
        }
        out
    }

    /// Mid-cadence sweep: re-evaluate, checkpoint everything, publish a
    /// summary.
    fn mid_actions(&mut self, now: DateTime<Utc>) -> Vec<PendingWrite> {
        let mut out = self.evaluate_portfolio(now);
        out.extend(self.window_checkpoint_actions());
        out.extend(self.trailing_checkpoint_action());
        if let Some(value) = encode(&self.breaker.checkpoint()) {
            out.push(PendingWrite::Save {
                key: keys::BREAKER_STATE.to_string(),
                value,
                ttl: keys::HOURLY_TTL,
            });
        }
        if let Some(payload) = encode(&self.summary(now)) {
            out.push(PendingWrite::Publish {
                topic: topics::RISK_OUTPUT.to_string(),
                payload,
            });
        }
        out
    }

    /// Health sweep: breaker recovery, stale stop cleanup, gauges.
    fn health_actions(&mut self, now: DateTime<Utc>, retention: chrono::Duration) -> Vec<PendingWrite> {
        let mut out = Vec::new();
        if let Some(transition) = self.breaker.check_recovery(now) {
            info!(from = %transition.from, to = %transition.to, "Breaker recovery step");
            out.extend(self.breaker_alert_actions(&transition));
        }

        let live: HashSet<_> = self
            .ledger
            .open_positions()
            .map(|position| position.id.clone())
            .collect();
        let removed = self.stops.cleanup_stale(&live, now, retention);
        if removed > 0 {
            info!(removed, "Dropped orphaned trailing stops");
            out.extend(self.trailing_checkpoint_action());
        }

        metrics::active_stops(self.stops.active_count());
        metrics::breaker_state(self.breaker.state());
        metrics::retry_depth(self.retry.len());
        out
    }

    fn window_checkpoint_actions(&self) -> Vec<PendingWrite> {
        let mut out = Vec::new();
        if let Some(value) = encode(self.tracker.daily_checkpoint()) {
            out.push(PendingWrite::Save {
                key: keys::PORTFOLIO_DAILY.to_string(),
                value,
                ttl: keys::DAILY_TTL,
            });
        }
        if let Some(value) = encode(&self.tracker.weekly_checkpoint()) {
            out.push(PendingWrite::Save {
                key: keys::PORTFOLIO_WEEKLY.to_string(),
                value,
                ttl: keys::WEEKLY_TTL,
            });
        }
        out
    }

    fn trailing_checkpoint_action(&self) -> Vec<PendingWrite> {
        let mut out = Vec::new();
        if let Some(value) = encode(&self.stops.snapshot()) {
            out.push(PendingWrite::Save {
                key: keys::TRAILING_STOPS.to_string(),
                value,
                ttl: keys::TRAILING_TTL,
            });
        }
        out
    }

    fn summary(&self, now: DateTime<Utc>) -> PortfolioSummary {
        let totals = self.ledger.totals();
        let limits = self.registry.snapshot();
        let balance = limits.portfolio.initial_balance + totals.realized_pnl + totals.unrealized_pnl;
        let daily = self.tracker.daily_checkpoint();
        let weekly = self.tracker.weekly_checkpoint();
        PortfolioSummary {
            at: now,
            status: self.last_status,
            balance,
            daily_pnl_fraction: daily.pnl_fraction(balance),
            weekly_pnl_fraction: weekly.window.pnl_fraction(balance),
            daily_high_water: daily.high_water,
            daily_low_water: daily.low_water,
            weekly_high_water: weekly.window.high_water,
            weekly_low_water: weekly.window.low_water,
            circuit_breaker_state: self.breaker.state(),
            active_trailing_stops_count: self.stops.active_count(),
            open_positions: self.ledger.open_count(),
            total_exposure: self.ledger.total_exposure(),
            positions: self.ledger.summary(),
            trailing: self.stops.summary(),
            validation: self.validator.stats(),
            limit_version: limits.version,
        }
    }
}

/// Risk coordinator: subscribes to market topics, routes events through
/// the risk state, and emits decisions, close instructions, and alerts.
pub struct RiskCoordinator<B: MessageBus, S: StateStore> {
    bus: Arc<B>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    state: Arc<RwLock<CoordinatorState>>,
}

impl<B: MessageBus + 'static, S: StateStore + 'static> RiskCoordinator<B, S> {
    pub fn new(
        bus: Arc<B>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        let now = clock.now();
        let state = CoordinatorState::new(&settings, now);
        Self {
            bus,
            store,
            clock,
            config: settings.cadence,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Restore checkpoints, subscribe to the inbound topics, and spawn
    /// the event loop.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        self.restore_checkpoints().await;

        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer);
        for topic in [
            topics::PRICES,
            topics::PROPOSALS,
            topics::FILLS,
            topics::OVERRIDES,
        ] {
            let mut subscription = self
                .bus
                .subscribe(topic)
                .await
                .with_context(|| format!("subscribing to {topic}"))?;
            let tx = event_tx.clone();
            tokio::spawn(async move {
                while let Some(message) = subscription.recv().await {
                    match RiskEvent::decode(&message) {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            metrics::event_undecodable(&message.topic);
                            warn!(topic = %message.topic, "Dropping undecodable message");
                        }
                    }
                }
            });
        }

        let coordinator = Arc::clone(&self);
        Ok(tokio::spawn(async move {
            coordinator.event_loop(event_rx).await;
        }))
    }

    async fn event_loop(self: Arc<Self>, mut events: mpsc::Receiver<RiskEvent>) {
        let mut fast = tokio::time::interval(self.config.fast_interval);
        let mut mid = tokio::time::interval(self.config.mid_interval);
        let mut health = tokio::time::interval(self.config.health_interval);
        info!("Risk coordinator started");

        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("Event channel closed, coordinator stopping");
                        break;
                    }
                },
                _ = fast.tick() => self.fast_sweep().await,
                _ = mid.tick() => self.mid_sweep().await,
                _ = health.tick() => self.health_sweep().await,
            }
        }
    }

    async fn handle_event(&self, event: RiskEvent) {
        let now = self.clock.now();
        let outbound = {
            let mut state = self.state.write().await;
            match event {
                RiskEvent::Price(update) => state.on_price(&update, now),
                RiskEvent::Proposal(proposal) => state.on_proposal(&proposal, now),
                RiskEvent::Fill(fill) => state.on_fill(&fill, now),
                RiskEvent::Override(request) => state.on_override(&request, now),
            }
        };
        self.dispatch(outbound).await;
    }

    async fn fast_sweep(&self) {
        let now = self.clock.now();
        let outbound = self.state.write().await.evaluate_portfolio(now);
        self.dispatch(outbound).await;
    }

    async fn mid_sweep(&self) {
        let now = self.clock.now();
        let outbound = self.state.write().await.mid_actions(now);
        self.dispatch(outbound).await;
    }

    async fn health_sweep(&self) {
        let now = self.clock.now();
        let retention = chrono::Duration::hours(self.config.stale_stop_retention_hours);
        let outbound = self.state.write().await.health_actions(now, retention);
        self.dispatch(outbound).await;
        self.flush_retries().await;
    }

    /// Attempt each outbound write; failures land on the retry queue
    /// instead of being dropped.
    async fn dispatch(&self, outbound: Vec<PendingWrite>) {
        if outbound.is_empty() {
            return;
        }
        let now = self.clock.now();
        let mut failed = Vec::new();
        for write in outbound {
            if let Some(write) = self.attempt(write).await {
                failed.push(write);
            }
        }
        if !failed.is_empty() {
            let mut state = self.state.write().await;
            for write in failed {
                state.retry.push(write, now);
            }
            metrics::retry_depth(state.retry.len());
        }
    }

    /// Returns the write back when it failed.
    async fn attempt(&self, write: PendingWrite) -> Option<PendingWrite> {
        match &write {
            PendingWrite::Publish { topic, payload } => {
                match self.bus.publish(topic, payload.clone()).await {
                    Ok(()) => None,
                    Err(err) => {
                        metrics::publish_failure();
                        warn!(topic = %topic, %err, "Publish failed, queueing for retry");
                        Some(write)
                    }
                }
            }
            PendingWrite::Save { key, value, ttl } => {
                match self.store.save(key, value.clone(), *ttl).await {
                    Ok(()) => None,
                    Err(err) => {
                        metrics::store_write_failure();
                        warn!(key = %key, %err, "Store write failed, queueing for retry");
                        Some(write)
                    }
                }
            }
        }
    }

    /// Re-attempt queued writes once their backoff has elapsed.
    async fn flush_retries(&self) {
        let now = self.clock.now();
        let pending = {
            let mut state = self.state.write().await;
            if !state.retry.ready(now) {
                return;
            }
            state.retry.drain()
        };
        if pending.is_empty() {
            return;
        }

        let total = pending.len();
        let mut failed = Vec::new();
        for write in pending {
            if let Some(write) = self.attempt(write).await {
                failed.push(write);
            }
        }

        let mut state = self.state.write().await;
        if failed.is_empty() {
            info!(flushed = total, "Retry queue drained");
            state.retry.mark_flushed();
        } else {
            state.retry.requeue(failed, now);
        }
        metrics::retry_depth(state.retry.len());
    }

    /// Load persisted state, freezing any position whose restored stop
    /// fails validation.
    async fn restore_checkpoints(&self) {
        let trailing: Option<Vec<TrailingStop>> = self.load_checkpoint(keys::TRAILING_STOPS).await;
        let daily: Option<PnlWindow> = self.load_checkpoint(keys::PORTFOLIO_DAILY).await;
        let weekly: Option<WeeklyCheckpoint> = self.load_checkpoint(keys::PORTFOLIO_WEEKLY).await;
        let breaker: Option<BreakerCheckpoint> = self.load_checkpoint(keys::BREAKER_STATE).await;

        let mut outbound = Vec::new();
        {
            let mut state = self.state.write().await;
            if let Some(stops) = trailing {
                let restored = stops.len();
                let violations = state.stops.restore(stops);
                info!(restored, "Restored trailing stops from checkpoint");
                for position_id in violations {
                    error!(
                        position_id = %position_id,
                        "Restored stop violates its invariants, freezing position"
                    );
                    // The ledger rebuilds from the fills topic, so the
                    // position is usually not booked yet; the id stays
                    // quarantined and the freeze lands when the fill
                    // replays.
                    if let Err(err) = state.ledger.freeze(&position_id) {
                        debug!(position_id = %position_id, %err, "Position not booked yet, freeze deferred");
                    }
                    state.quarantined.insert(position_id.clone());
                    if let Some(payload) = encode(&RiskAlert::PositionFrozen {
                        position_id: position_id.clone(),
                        detail: "restored trailing stop failed validation".to_string(),
                    }) {
                        outbound.push(PendingWrite::Publish {
                            topic: topics::RISK_ALERTS.to_string(),
                            payload,
                        });
                    }
                }
            }
            state.tracker.restore(daily, weekly);
            if let Some(checkpoint) = breaker {
                state.breaker.restore(checkpoint);
                info!(state = %state.breaker.state(), "Restored breaker state");
            }
            metrics::breaker_state(state.breaker.state());
        }
        self.dispatch(outbound).await;
    }

    async fn load_checkpoint<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.load(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!(key = %key, %err, "Discarding unreadable checkpoint");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, %err, "Checkpoint load failed, starting fresh");
                None
            }
        }
    }
}

/// Stop updates inform strategies; closes instruct execution.
fn action_topic(action: &StopAction) -> &'static str {
    match action {
        StopAction::UpdateStop { .. } => topics::RISK_OUTPUT,
        StopAction::Close { .. } => topics::EXECUTION,
    }
}

fn encode<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            error!(%err, "Failed to encode outbound payload");
            None
        }
    }
}
