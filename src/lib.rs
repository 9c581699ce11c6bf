//! risk-core: Real-time risk and position control core
//!
//! This library provides the core components for:
//! - Position ledger with mark-to-market P&L
//! - Strategy-specific trailing-stop state machines
//! - Portfolio loss/reward tracking over daily and weekly windows
//! - Trading circuit breaker with scheduled and manual recovery
//! - Trade proposal validation against adaptive risk limits
//! - Event-driven coordination over pluggable bus/store collaborators
//! - Full observability stack

pub mod breaker;
pub mod bus;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod ledger;
pub mod limits;
pub mod portfolio;
pub mod store;
pub mod telemetry;
pub mod trailing;
pub mod validator;
