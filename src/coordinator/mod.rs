//! Risk coordinator: event routing, cadenced sweeps, and checkpointing

mod engine;
mod events;

pub use engine::{CoordinatorConfig, CoordinatorSettings, RiskCoordinator};
pub use events::{PortfolioSummary, RiskAlert, RiskEvent};
