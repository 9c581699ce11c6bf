use clap::Parser;
use risk_core::cli::{Cli, Commands};
use risk_core::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        toml::from_str(include_str!("../config.toml.example")).expect("Invalid default config")
    });

    // Initialize telemetry
    let _telemetry = risk_core::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting risk core");
            args.execute(config).await?;
        }
        Commands::Status => {
            println!("risk-core status");
            println!("  Status: Not running");
        }
        Commands::Config => {
            let limits = config.limits();
            println!("Current configuration:");
            println!("  Initial balance: {}", config.portfolio.initial_balance);
            println!(
                "  Daily loss limit: {}%",
                config.portfolio.max_daily_loss_pct * rust_decimal_macros::dec!(100)
            );
            println!(
                "  Weekly target: {}%",
                config.portfolio.weekly_target_pct * rust_decimal_macros::dec!(100)
            );
            println!("  Strategies: {}", limits.strategies.len());
            println!(
                "  Breaker probation: {} min",
                config.breaker.probation_minutes
            );
        }
    }

    Ok(())
}
