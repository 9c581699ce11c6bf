//! Run command implementation

use std::sync::Arc;

use clap::Args;

use crate::bus::InMemoryBus;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::coordinator::RiskCoordinator;
use crate::store::MemoryStore;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    /// Wire the coordinator to process-local collaborators and run
    /// until interrupted.
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let clock = Arc::new(SystemClock);
        let bus = Arc::new(InMemoryBus::default());
        let store = Arc::new(MemoryStore::new(clock.clone()));

        let coordinator = Arc::new(RiskCoordinator::new(bus, store, clock, config.settings()));
        let handle = coordinator.start().await?;

        tracing::info!("Risk core running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        handle.abort();
        Ok(())
    }
}
