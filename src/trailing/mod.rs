//! Trailing stop module
//!
//! Per-position trailing-stop state machines: activation on profit,
//! monotonic stop adjustment, tightening, and trigger detection.

mod engine;
mod types;

pub use engine::TrailingStopEngine;
pub use types::{CloseReason, StopAction, StopPhase, TrailingError, TrailingStop, TrailingSummary};
