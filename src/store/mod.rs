//! Durable state store abstraction
//!
//! Portfolio and trailing-stop state survive restarts through an external
//! key-value collaborator with bounded retention. The core only ever calls
//! `load`/`save` at checkpoints and keeps running on in-memory state when the
//! store is unreachable; failed writes go through the retry queue.

mod memory;
mod retry;

pub use memory::MemoryStore;
pub use retry::{PendingWrite, RetryQueue};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Checkpoint keys and their retention windows
pub mod keys {
    use std::time::Duration;

    /// Trailing-stop engine state
    pub const TRAILING_STOPS: &str = "trailing_stops";
    /// Daily performance window
    pub const PORTFOLIO_DAILY: &str = "portfolio_daily";
    /// Weekly performance window
    pub const PORTFOLIO_WEEKLY: &str = "portfolio_weekly";
    /// Circuit breaker state
    pub const BREAKER_STATE: &str = "breaker_state";

    /// Key for a single validation audit record
    pub fn audit(id: &uuid::Uuid) -> String {
        format!("audit:{id}")
    }

    /// Retention for trailing-stop state (hours scale)
    pub const TRAILING_TTL: Duration = Duration::from_secs(4 * 3600);
    /// Retention for daily metrics
    pub const DAILY_TTL: Duration = Duration::from_secs(24 * 3600);
    /// Retention for weekly metrics
    pub const WEEKLY_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
    /// Retention for breaker state and audit records
    pub const HOURLY_TTL: Duration = Duration::from_secs(3600);
}

/// State store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store is unreachable
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    /// Stored payload could not be decoded
    #[error("corrupt snapshot under key {key}: {source}")]
    Corrupt {
        /// Key that held the snapshot
        key: String,
        /// Decode failure
        #[source]
        source: serde_json::Error,
    },
}

/// Trait for keyed snapshot persistence with TTL
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load a snapshot, `None` if absent or expired
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;
    /// Save a snapshot with the given retention
    async fn save(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;
}
