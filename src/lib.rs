//! Trend Trader
//!
//! A crypto trading bot that follows peaks and troughs in streaming ticker
//! prices. Each pair keeps a [`PriceSeries`] with its detected extrema; buys
//! go to the pairs that climbed furthest from their largest recent trough,
//! and every open [`Trade`] is exited by take profit, trailing take profit or
//! a (trailing) stop loss.

pub mod config;
pub mod error;
pub mod exchange;
pub mod formatter;
pub mod price_series;
pub mod session;
pub mod store;
pub mod strategy;
pub mod trade;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, EngineError, EngineResult};
pub use price_series::PriceSeries;
pub use session::Session;
pub use strategy::{StrategyParameters, StrategyRanker};
pub use trade::{SellReason, Trade};
pub use types::*;
