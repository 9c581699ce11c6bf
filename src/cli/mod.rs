//! CLI interface for risk-core
//!
//! Provides subcommands for:
//! - `run`: Run the risk core against process-local collaborators
//! - `status`: Show current state
//! - `config`: Show the effective configuration

mod run;

pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "risk-core")]
#[command(about = "Real-time risk and position control core")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the risk core until interrupted
    Run(RunArgs),
    /// Show current state
    Status,
    /// Show the effective configuration
    Config,
}
