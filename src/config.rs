//! Configuration types for risk-core

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::coordinator::{CoordinatorConfig, CoordinatorSettings};
use crate::ledger::StrategyKind;
use crate::limits::{
    AdaptivePolicy, PortfolioLimits, RiskLimitConfig, SafetyBounds, TrailingParams,
};
use crate::telemetry::LogFormat;
use crate::validator::CorrelationMap;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    /// Per-strategy limit overrides, merged over the built-in defaults
    #[serde(default)]
    pub strategies: HashMap<StrategyKind, StrategyOverride>,
    #[serde(default)]
    pub adaptive: AdaptivePolicy,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Portfolio window and exposure limits
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioConfig {
    /// Account balance the P&L windows start from
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,

    /// Daily loss fraction that trips the circuit breaker
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: Decimal,

    /// Daily loss fraction that raises a warning alert
    #[serde(default = "default_warning_loss_pct")]
    pub warning_loss_pct: Decimal,

    /// Weekly profit fraction counted as target achievement
    #[serde(default = "default_weekly_target_pct")]
    pub weekly_target_pct: Decimal,

    /// Maximum simultaneously open positions
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    /// Maximum same-direction exposure within one correlation group
    #[serde(default = "default_max_correlated_exposure_pct")]
    pub max_correlated_exposure_pct: Decimal,
}

fn default_initial_balance() -> Decimal {
    PortfolioLimits::default().initial_balance
}
fn default_max_daily_loss_pct() -> Decimal {
    PortfolioLimits::default().max_daily_loss_pct
}
fn default_warning_loss_pct() -> Decimal {
    PortfolioLimits::default().warning_loss_pct
}
fn default_weekly_target_pct() -> Decimal {
    PortfolioLimits::default().weekly_target_pct
}
fn default_max_concurrent_positions() -> usize {
    PortfolioLimits::default().max_concurrent_positions
}
fn default_max_correlated_exposure_pct() -> Decimal {
    PortfolioLimits::default().max_correlated_exposure_pct
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        let limits = PortfolioLimits::default();
        Self {
            initial_balance: limits.initial_balance,
            max_daily_loss_pct: limits.max_daily_loss_pct,
            warning_loss_pct: limits.warning_loss_pct,
            weekly_target_pct: limits.weekly_target_pct,
            max_concurrent_positions: limits.max_concurrent_positions,
            max_correlated_exposure_pct: limits.max_correlated_exposure_pct,
        }
    }
}

impl PortfolioConfig {
    fn to_limits(&self) -> PortfolioLimits {
        PortfolioLimits {
            initial_balance: self.initial_balance,
            max_daily_loss_pct: self.max_daily_loss_pct,
            warning_loss_pct: self.warning_loss_pct,
            weekly_target_pct: self.weekly_target_pct,
            max_concurrent_positions: self.max_concurrent_positions,
            max_correlated_exposure_pct: self.max_correlated_exposure_pct,
        }
    }
}

/// Per-strategy override; absent fields keep the built-in value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyOverride {
    pub max_position_pct: Option<Decimal>,
    pub max_leverage: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    /// Replaces the built-in trailing behavior outright when present
    pub trailing: Option<TrailingConfig>,
}

/// Trailing-stop parameters
#[derive(Debug, Clone, Deserialize)]
pub struct TrailingConfig {
    pub activation_threshold: Decimal,
    pub trailing_distance: Decimal,
    pub tightening_step: Decimal,
    pub tighten_at: Decimal,
}

/// Coordinator loop cadence and plumbing
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Portfolio evaluation sweep (seconds)
    #[serde(default = "default_fast_interval_secs")]
    pub fast_interval_secs: u64,

    /// Summary and checkpoint sweep (seconds)
    #[serde(default = "default_mid_interval_secs")]
    pub mid_interval_secs: u64,

    /// Breaker recovery and cleanup sweep (seconds)
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Orphaned stops older than this are dropped (hours)
    #[serde(default = "default_stale_stop_retention_hours")]
    pub stale_stop_retention_hours: i64,

    /// Inbound event channel capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Consecutive tighten adjustments on one strategy before the
    /// breaker trips
    #[serde(default = "default_storm_tighten_trips")]
    pub storm_tighten_trips: u32,

    /// Retry queue capacity for failed writes
    #[serde(default = "default_retry_capacity")]
    pub retry_capacity: usize,

    /// First retry backoff (seconds)
    #[serde(default = "default_retry_base_backoff_secs")]
    pub retry_base_backoff_secs: i64,

    /// Retry backoff ceiling (seconds)
    #[serde(default = "default_retry_max_backoff_secs")]
    pub retry_max_backoff_secs: i64,
}

fn default_fast_interval_secs() -> u64 {
    CoordinatorConfig::default().fast_interval.as_secs()
}
fn default_mid_interval_secs() -> u64 {
    CoordinatorConfig::default().mid_interval.as_secs()
}
fn default_health_interval_secs() -> u64 {
    CoordinatorConfig::default().health_interval.as_secs()
}
fn default_stale_stop_retention_hours() -> i64 {
    CoordinatorConfig::default().stale_stop_retention_hours
}
fn default_event_buffer() -> usize {
    CoordinatorConfig::default().event_buffer
}
fn default_storm_tighten_trips() -> u32 {
    CoordinatorConfig::default().storm_tighten_trips
}
fn default_retry_capacity() -> usize {
    CoordinatorConfig::default().retry_capacity
}
fn default_retry_base_backoff_secs() -> i64 {
    CoordinatorConfig::default().retry_base_backoff_secs
}
fn default_retry_max_backoff_secs() -> i64 {
    CoordinatorConfig::default().retry_max_backoff_secs
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cadence = CoordinatorConfig::default();
        Self {
            fast_interval_secs: cadence.fast_interval.as_secs(),
            mid_interval_secs: cadence.mid_interval.as_secs(),
            health_interval_secs: cadence.health_interval.as_secs(),
            stale_stop_retention_hours: cadence.stale_stop_retention_hours,
            event_buffer: cadence.event_buffer,
            storm_tighten_trips: cadence.storm_tighten_trips,
            retry_capacity: cadence.retry_capacity,
            retry_base_backoff_secs: cadence.retry_base_backoff_secs,
            retry_max_backoff_secs: cadence.retry_max_backoff_secs,
        }
    }
}

impl RuntimeConfig {
    fn to_cadence(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            fast_interval: Duration::from_secs(self.fast_interval_secs),
            mid_interval: Duration::from_secs(self.mid_interval_secs),
            health_interval: Duration::from_secs(self.health_interval_secs),
            stale_stop_retention_hours: self.stale_stop_retention_hours,
            event_buffer: self.event_buffer,
            storm_tighten_trips: self.storm_tighten_trips,
            retry_capacity: self.retry_capacity,
            retry_base_backoff_secs: self.retry_base_backoff_secs,
            retry_max_backoff_secs: self.retry_max_backoff_secs,
        }
    }
}

/// Symbol correlation groups
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorrelationConfig {
    /// Symbol to group name, e.g. `"BTC-USD" = "crypto-majors"`
    #[serde(default)]
    pub groups: HashMap<String, String>,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter port, disabled when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Build the initial limit snapshot, merging overrides over the
    /// built-in defaults and clamping to each strategy's safety bounds.
    pub fn limits(&self) -> RiskLimitConfig {
        let mut config = RiskLimitConfig::default();
        config.portfolio = self.portfolio.to_limits();
        for (kind, over) in &self.strategies {
            let bounds = SafetyBounds::defaults_for(*kind);
            if let Some(limits) = config.strategies.get_mut(kind) {
                if let Some(value) = over.max_position_pct {
                    limits.max_position_pct = bounds.max_position_pct.clamp(value);
                }
                if let Some(value) = over.max_leverage {
                    limits.max_leverage = bounds.max_leverage.clamp(value);
                }
                if let Some(value) = over.stop_loss_pct {
                    limits.stop_loss_pct = bounds.stop_loss_pct.clamp(value);
                }
                if let Some(value) = over.take_profit_pct {
                    limits.take_profit_pct = value;
                }
                if let Some(trailing) = &over.trailing {
                    limits.trailing = Some(TrailingParams {
                        activation_threshold: trailing.activation_threshold,
                        trailing_distance: trailing.trailing_distance,
                        tightening_step: trailing.tightening_step,
                        tighten_at: trailing.tighten_at,
                    });
                }
            }
        }
        config
    }

    /// Everything the coordinator needs to start
    pub fn settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            cadence: self.runtime.to_cadence(),
            limits: self.limits(),
            breaker: self.breaker.clone(),
            adaptive: self.adaptive,
            correlation: CorrelationMap::new(self.correlation.groups.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.portfolio.initial_balance, dec!(10000));
        assert_eq!(config.portfolio.max_daily_loss_pct, dec!(0.02));
        assert_eq!(config.runtime.fast_interval_secs, 60);
        assert!(config.telemetry.metrics_port.is_none());

        let limits = config.limits();
        assert_eq!(limits.strategies.len(), StrategyKind::ALL.len());
    }

    #[test]
    fn test_config_deserialize() {
        let toml = r#"
            [portfolio]
            initial_balance = 50000
            max_daily_loss_pct = 0.03
            warning_loss_pct = 0.02
            weekly_target_pct = 0.15
            max_concurrent_positions = 6
            max_correlated_exposure_pct = 0.30

            [strategies.trend_following]
            max_position_pct = 0.10

            [strategies.trend_following.trailing]
            activation_threshold = 0.004
            trailing_distance = 0.012
            tightening_step = 0.003
            tighten_at = 0.025

            [breaker]
            probation_minutes = 15
            flap_window_minutes = 45
            flap_penalty_factor = 3
            max_open_hours = 48
            history_limit = 20
            authorized_identities = ["risk-admin"]

            [runtime]
            fast_interval_secs = 10
            mid_interval_secs = 60

            [correlation.groups]
            "BTC-USD" = "crypto-majors"
            "ETH-USD" = "crypto-majors"

            [telemetry]
            metrics_port = 9102
            log_level = "debug"
            log_format = "json"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.portfolio.initial_balance, dec!(50000));
        assert_eq!(config.breaker.probation_minutes, 15);
        assert_eq!(config.breaker.authorized_identities, vec!["risk-admin"]);
        assert_eq!(config.runtime.fast_interval_secs, 10);
        // Unset runtime fields keep their defaults.
        assert_eq!(config.runtime.health_interval_secs, 30);
        assert_eq!(config.telemetry.metrics_port, Some(9102));
        assert_eq!(config.telemetry.log_format, LogFormat::Json);

        let limits = config.limits();
        let trend = limits.strategy(StrategyKind::TrendFollowing).unwrap();
        assert_eq!(trend.max_position_pct, dec!(0.10));
        // Untouched fields keep the built-in values.
        assert_eq!(trend.max_leverage, dec!(1.2));
        let trailing = trend.trailing.unwrap();
        assert_eq!(trailing.trailing_distance, dec!(0.012));
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        // A section listing only some fields must not fail to parse.
        let toml = r#"
            [breaker]
            authorized_identities = ["risk-admin"]

            [adaptive]
            tighten_after = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.breaker.authorized_identities, vec!["risk-admin"]);
        assert_eq!(config.breaker.probation_minutes, 30);
        assert_eq!(config.breaker.history_limit, 50);
        assert_eq!(config.adaptive.tighten_after, 5);
        assert_eq!(config.adaptive.loosen_after, 20);
        assert_eq!(config.adaptive.adjust_step, dec!(0.10));
    }

    #[test]
    fn test_override_clamps_to_safety_bounds() {
        let toml = r#"
            [strategies.trend_following]
            max_position_pct = 0.90
            max_leverage = 50.0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let limits = config.limits();
        let trend = limits.strategy(StrategyKind::TrendFollowing).unwrap();
        // Bounds for trend following are (0.05, 0.25) and (1.0, 2.0).
        assert_eq!(trend.max_position_pct, dec!(0.25));
        assert_eq!(trend.max_leverage, dec!(2.0));
    }

    #[test]
    fn test_settings_carries_correlation_groups() {
        let toml = r#"
            [correlation.groups]
            "BTC-USD" = "crypto-majors"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let settings = config.settings();
        assert_eq!(settings.correlation.group_of("BTC-USD"), "crypto-majors");
        assert_eq!(settings.correlation.group_of("SOL-USD"), "SOL-USD");
    }

    #[test]
    fn test_config_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[portfolio]\ninitial_balance = 25000\n\n[telemetry]\nlog_level = \"warn\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.portfolio.initial_balance, dec!(25000));
        assert_eq!(config.telemetry.log_level, "warn");
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }
}
