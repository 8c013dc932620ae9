//! Configuration management for the backtester.
//!
//! Loads settings from environment variables and config files. Every tunable
//! that the pipeline depends on lives here explicitly; nothing is a
//! module-level default, so independent fetches and simulations never share
//! hidden state.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Exchange endpoint settings
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Fetch pipeline tuning
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Backtest simulation settings
    #[serde(default)]
    pub backtest: BacktestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Base URL of the candles endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Product (trading pair) to fetch
    #[serde(default = "default_product")]
    pub product: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum candles the provider returns per request
    #[serde(default = "default_max_candles")]
    pub max_candles_per_request: u32,
    /// Attempt budget per chunk
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for backoff and pacing, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Consecutive failed chunks before the whole fetch aborts
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Pacing cost per returned row, in milliseconds
    #[serde(default = "default_pacing_per_row_ms")]
    pub pacing_per_row_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Initial capital for the simulation
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
}

// Default value functions

fn default_base_url() -> String {
    "https://api.exchange.coinbase.com".to_string()
}

fn default_product() -> String {
    "BTC-USD".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_candles() -> u32 {
    250
}

fn default_max_retries() -> u32 {
    8
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_pacing_per_row_ms() -> u64 {
    10
}

fn default_initial_capital() -> Decimal {
    Decimal::new(10_000, 0)
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("CSB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.exchange.base_url.is_empty(),
            "exchange base_url must not be empty"
        );

        anyhow::ensure!(
            self.fetch.max_candles_per_request > 0,
            "max_candles_per_request must be positive"
        );

        anyhow::ensure!(self.fetch.max_retries > 0, "max_retries must be positive");

        anyhow::ensure!(
            self.fetch.max_consecutive_errors > 0,
            "max_consecutive_errors must be positive"
        );

        anyhow::ensure!(
            self.backtest.initial_capital > Decimal::ZERO,
            "initial_capital must be positive"
        );

        Ok(())
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            product: default_product(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_candles_per_request: default_max_candles(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            pacing_per_row_ms: default_pacing_per_row_ms(),
        }
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reference_fetch_constants() {
        let fetch = FetchConfig::default();
        assert_eq!(fetch.max_candles_per_request, 250);
        assert_eq!(fetch.max_retries, 8);
        assert_eq!(fetch.base_delay_ms, 2_000);
        assert_eq!(fetch.max_consecutive_errors, 5);
    }

    #[test]
    fn test_zero_initial_capital_rejected() {
        let mut config = Config::default();
        config.backtest.initial_capital = Decimal::ZERO;
        assert!(config.validate().is_err());
    }
}
