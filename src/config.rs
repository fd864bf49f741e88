//! Configuration management
//!
//! Handles loading and parsing of the JSON session configuration, with
//! environment variable overrides for deployment-specific paths.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::strategy::StrategyParameters;
use crate::{AssetPair, Fee, Symbol};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub strategy: StrategyParameters,
    #[serde(default)]
    pub state: StateConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        if let Ok(state_path) = std::env::var("TREND_TRADER_STATE_PATH") {
            config.state.path = PathBuf::from(state_path);
        }
        if let Ok(url) = std::env::var("TREND_TRADER_TICKER_URL") {
            config.exchange.ticker_url = url;
        }

        Ok(config)
    }

    /// Reject parameter sets the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;

        if self.trading.pairs.is_empty() {
            return Err(ConfigError::NoPairs);
        }
        let quote = self.exchange.quote();
        if let Some(pair) = self.trading.pairs.iter().find(|p| p.quote != quote) {
            return Err(ConfigError::QuoteMismatch {
                pair: pair.to_string(),
                quote: quote.to_string(),
            });
        }
        if self.exchange.fee_percentage < 0.0 {
            return Err(ConfigError::Negative {
                field: "fee_percentage",
                value: self.exchange.fee_percentage.to_string(),
            });
        }
        Ok(())
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub ticker_url: String,
    /// Fee charged per fill, in percent of notional
    pub fee_percentage: f64,
    /// Quote asset every configured pair trades against
    pub quote: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            ticker_url: "https://api.coindcx.com/exchange/ticker".to_string(),
            fee_percentage: 0.1,
            quote: "INR".to_string(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ExchangeConfig {
    pub fn quote(&self) -> Symbol {
        Symbol::new(&self.quote)
    }

    /// Fee schedule applied to every paper fill
    pub fn fees(&self) -> Vec<Fee> {
        if self.fee_percentage == 0.0 {
            Vec::new()
        } else {
            vec![Fee::percentage(self.fee_percentage)]
        }
    }
}

/// Trading loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub pairs: Vec<AssetPair>,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Wall-clock budget for processing all series in one tick; slower ticks
    /// halve every series
    #[serde(default = "default_process_budget")]
    pub process_budget_ms: u64,
}

fn default_tick_interval() -> u64 {
    10
}

fn default_process_budget() -> u64 {
    200
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            pairs: vec![AssetPair::new("BTC", "INR"), AssetPair::new("ETH", "INR")],
            tick_interval_secs: default_tick_interval(),
            process_budget_ms: default_process_budget(),
        }
    }
}

/// Session state persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            path: PathBuf::from("state/session.json"),
        }
    }
}
