//! Error types for the trading engine
//!
//! "Nothing found" conditions (empty series, no peak yet, no trough inside the
//! age window) are `Option`s and never surface here. These variants are the
//! conditions a caller cannot paper over.

use thiserror::Error;

use crate::{AssetPair, TradeStatus};

/// Errors raised by the session and trade state machine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A trade references a pair that has no price series. This is an
    /// invariant violation; the scheduler decides whether to skip the tick or
    /// stop.
    #[error("no price series registered for {pair} (trade {trade_id})")]
    MissingPriceSeries { pair: AssetPair, trade_id: String },

    #[error("trade {trade_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        trade_id: String,
        from: TradeStatus,
        to: TradeStatus,
    },

    #[error("no price available for {0}")]
    NoPrice(AssetPair),

    #[error("order rejected for {pair}: {reason}")]
    OrderRejected { pair: AssetPair, reason: String },
}

impl EngineError {
    /// Whether the error indicates corrupted engine state rather than a
    /// transient condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::MissingPriceSeries { .. } | EngineError::InvalidTransition { .. }
        )
    }
}

/// Configuration problems detected when a session is validated at startup
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("trailing take-profit is enabled but trailing_take_profit_slip_percentage is {0}")]
    ZeroTakeProfitSlip(f64),

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: String },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: String },

    #[error("{0} is 0, no trade could ever be opened")]
    ZeroLimit(&'static str),

    #[error("no trading pairs configured")]
    NoPairs,

    #[error("pair {pair} does not use the exchange quote asset {quote}")]
    QuoteMismatch { pair: String, quote: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
