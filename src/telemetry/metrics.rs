//! Prometheus metrics
//!
//! Free helper functions over the `metrics` macros so call sites stay
//! one line. The exporter serves `/metrics` on its own listener.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::breaker::BreakerState;
use crate::validator::Decision;

/// Install the Prometheus recorder with an HTTP listener.
///
/// Must run inside a Tokio runtime; the exporter spawns its listener
/// there.
pub fn init_exporter(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;
    Ok(())
}

/// Count a validation outcome by decision
pub fn proposal_validated(decision: &Decision) {
    let label = match decision {
        Decision::Approved => "approved",
        Decision::Rejected { .. } => "rejected",
        Decision::Conditional { .. } => "conditional",
    };
    counter!("riskcore_proposals_total", "decision" => label).increment(1);
}

/// Record how long one validation took
pub fn validation_seconds(seconds: f64) {
    histogram!("riskcore_validation_duration_seconds").record(seconds);
}

pub fn position_opened() {
    counter!("riskcore_positions_opened_total").increment(1);
}

pub fn position_closed() {
    counter!("riskcore_positions_closed_total").increment(1);
}

pub fn open_positions(count: usize) {
    gauge!("riskcore_open_positions").set(count as f64);
}

pub fn stop_updated() {
    counter!("riskcore_stop_updates_total").increment(1);
}

pub fn stop_triggered() {
    counter!("riskcore_stops_triggered_total").increment(1);
}

pub fn active_stops(count: usize) {
    gauge!("riskcore_active_trailing_stops").set(count as f64);
}

/// Daily P&L as a signed fraction of the window start balance
pub fn daily_pnl(fraction: Decimal) {
    gauge!("riskcore_daily_pnl_fraction").set(fraction.to_f64().unwrap_or(0.0));
}

pub fn portfolio_balance(balance: Decimal) {
    gauge!("riskcore_portfolio_balance").set(balance.to_f64().unwrap_or(0.0));
}

/// Breaker state as a gauge: 0 closed, 1 open, 2 recovering
pub fn breaker_state(state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::Open => 1.0,
        BreakerState::Recovering => 2.0,
    };
    gauge!("riskcore_breaker_state").set(value);
}

pub fn breaker_transition() {
    counter!("riskcore_breaker_transitions_total").increment(1);
}

pub fn retry_depth(depth: usize) {
    gauge!("riskcore_retry_queue_depth").set(depth as f64);
}

pub fn publish_failure() {
    counter!("riskcore_publish_failures_total").increment(1);
}

pub fn store_write_failure() {
    counter!("riskcore_store_write_failures_total").increment(1);
}

pub fn event_undecodable(topic: &str) {
    counter!("riskcore_undecodable_messages_total", "topic" => topic.to_string()).increment(1);
}
