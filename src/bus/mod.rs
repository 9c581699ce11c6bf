//! Message bus abstraction
//!
//! The core talks to its collaborators (strategy, execution, dashboards)
//! exclusively through topic-based publish/subscribe. The trait is narrow so
//! a broker-backed implementation can be swapped in without touching the
//! coordinator; `InMemoryBus` backs tests and the default runtime wiring.

mod memory;

pub use memory::InMemoryBus;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Topic names shared with collaborators
pub mod topics {
    /// Inbound per-position price updates
    pub const PRICES: &str = "prices";
    /// Inbound trade proposals awaiting validation
    pub const PROPOSALS: &str = "proposals";
    /// Inbound open/close confirmations from execution
    pub const FILLS: &str = "fills";
    /// Inbound manual breaker override requests
    pub const OVERRIDES: &str = "overrides";
    /// Outbound close instructions for the execution collaborator
    pub const EXECUTION: &str = "execution";
    /// Outbound validation results, stop updates, and summaries
    pub const RISK_OUTPUT: &str = "risk_output";
    /// Outbound circuit-breaker alerts
    pub const RISK_ALERTS: &str = "risk_alerts";
}

/// Message bus errors
#[derive(Debug, Error)]
pub enum BusError {
    /// Transport is unreachable
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    /// Subscription could not be established
    #[error("subscribe failed for topic {0}")]
    SubscribeFailed(String),
}

/// A message delivered to a subscriber
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,
    /// JSON payload
    pub payload: Value,
}

/// Trait for topic-based publish/subscribe transports
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError>;
    /// Subscribe to a topic, receiving all messages published after this call
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<BusMessage>, BusError>;
}
