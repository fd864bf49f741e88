//! Strategy parameters and buy-side ranking
//!
//! [`StrategyParameters`] is the immutable per-session parameter set shared by
//! every trade evaluation. [`StrategyRanker`] decides which pairs may be bought
//! and in which order, based on how far each pair has climbed since its
//! largest recent trough.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::error::ConfigError;
use crate::price_series::PriceSeries;
use crate::trade::Trade;
use crate::{percentage, AssetPair, Money, TradeStatus};

/// Strategy parameters, read-only for the lifetime of a session
///
/// Limits and the trough age accept `-1` in configuration files to mean
/// "unlimited" and are held as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParameters {
    /// Quote amount spent per buy
    pub trade_amount: Money,
    #[serde(with = "unlimited")]
    pub maximum_open_trades: Option<usize>,
    #[serde(with = "unlimited")]
    pub maximum_open_trades_per_asset_pair: Option<usize>,
    pub take_profit_percentage: f64,
    pub trailing_take_profit_enabled: bool,
    pub trailing_take_profit_slip_percentage: f64,
    pub stop_loss_enabled: bool,
    pub stop_loss_percentage: f64,
    pub stop_loss_timeout_seconds: u64,
    pub trailing_stop_loss_enabled: bool,
    pub trailing_stop_loss_percentage: f64,
    pub buy_trough_uptrend_percentage: f64,
    #[serde(with = "unlimited")]
    pub buy_trough_uptrend_maximum_age_seconds: Option<i64>,
}

impl Default for StrategyParameters {
    fn default() -> Self {
        Self {
            trade_amount: Money::from_f64(1000.0),
            maximum_open_trades: Some(3),
            maximum_open_trades_per_asset_pair: Some(1),
            take_profit_percentage: 2.0,
            trailing_take_profit_enabled: true,
            trailing_take_profit_slip_percentage: 0.5,
            stop_loss_enabled: true,
            stop_loss_percentage: 5.0,
            stop_loss_timeout_seconds: 0,
            trailing_stop_loss_enabled: false,
            trailing_stop_loss_percentage: 3.0,
            buy_trough_uptrend_percentage: 1.0,
            buy_trough_uptrend_maximum_age_seconds: Some(3600),
        }
    }
}

impl StrategyParameters {
    /// Set the quote amount spent per buy
    pub fn with_trade_amount(mut self, amount: impl Into<Money>) -> Self {
        self.trade_amount = amount.into();
        self
    }

    /// Set global and per-pair open trade limits (`None` = unlimited)
    pub fn with_limits(mut self, total: Option<usize>, per_pair: Option<usize>) -> Self {
        self.maximum_open_trades = total;
        self.maximum_open_trades_per_asset_pair = per_pair;
        self
    }

    /// Set take profit, optionally trailing with the given slip
    pub fn with_take_profit(mut self, pct: f64, trailing_slip: Option<f64>) -> Self {
        self.take_profit_percentage = pct;
        self.trailing_take_profit_enabled = trailing_slip.is_some();
        if let Some(slip) = trailing_slip {
            self.trailing_take_profit_slip_percentage = slip;
        }
        self
    }

    /// Enable the fixed stop loss with a grace period (0 = act immediately)
    pub fn with_stop_loss(mut self, pct: f64, timeout_seconds: u64) -> Self {
        self.stop_loss_enabled = true;
        self.stop_loss_percentage = pct;
        self.stop_loss_timeout_seconds = timeout_seconds;
        self
    }

    pub fn without_stop_loss(mut self) -> Self {
        self.stop_loss_enabled = false;
        self
    }

    /// Enable the trailing stop loss at the given distance below peak profit
    pub fn with_trailing_stop_loss(mut self, pct: f64) -> Self {
        self.trailing_stop_loss_enabled = true;
        self.trailing_stop_loss_percentage = pct;
        self
    }

    /// Set the buy gate: minimum uptrend since the largest trough inside the window
    pub fn with_buy_trough(mut self, uptrend_pct: f64, max_age_seconds: Option<i64>) -> Self {
        self.buy_trough_uptrend_percentage = uptrend_pct;
        self.buy_trough_uptrend_maximum_age_seconds = max_age_seconds;
        self
    }

    /// Trough look-back window in milliseconds
    pub fn buy_trough_max_age_ms(&self) -> Option<i64> {
        self.buy_trough_uptrend_maximum_age_seconds
            .map(|secs| secs.saturating_mul(1000))
    }

    /// Check the parameter set once at session start. Evaluation code assumes
    /// a validated set and never re-checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.trade_amount.is_positive() {
            return Err(ConfigError::NotPositive {
                field: "trade_amount",
                value: self.trade_amount.to_string(),
            });
        }
        if self.take_profit_percentage <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "take_profit_percentage",
                value: self.take_profit_percentage.to_string(),
            });
        }
        if self.trailing_take_profit_enabled && self.trailing_take_profit_slip_percentage <= 0.0 {
            return Err(ConfigError::ZeroTakeProfitSlip(
                self.trailing_take_profit_slip_percentage,
            ));
        }
        for (field, value) in [
            ("stop_loss_percentage", self.stop_loss_percentage),
            (
                "trailing_stop_loss_percentage",
                self.trailing_stop_loss_percentage,
            ),
            (
                "buy_trough_uptrend_percentage",
                self.buy_trough_uptrend_percentage,
            ),
        ] {
            if value < 0.0 {
                return Err(ConfigError::Negative {
                    field,
                    value: value.to_string(),
                });
            }
        }
        if self.maximum_open_trades == Some(0) {
            return Err(ConfigError::ZeroLimit("maximum_open_trades"));
        }
        if self.maximum_open_trades_per_asset_pair == Some(0) {
            return Err(ConfigError::ZeroLimit("maximum_open_trades_per_asset_pair"));
        }
        Ok(())
    }
}

/// Serde for optional limits written as `-1` when unlimited
mod unlimited {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Copy + TryInto<i64>,
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_i64((*v).try_into().unwrap_or(i64::MAX)),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: TryFrom<i64>,
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        if raw < 0 {
            return Ok(None);
        }
        T::try_from(raw)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("limit {} out of range", raw)))
    }
}

/// Outcome of the buy gate for one pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuyCheck {
    /// Eligible; carries the uptrend since the largest trough
    Eligible(f64),
    MaxOpenTrades,
    MaxOpenTradesForPair,
    NoTrough,
    WeakUptrend(f64),
}

impl BuyCheck {
    pub fn is_eligible(&self) -> bool {
        matches!(self, BuyCheck::Eligible(_))
    }
}

/// A candidate pair with its uptrend since the largest recent trough
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPair {
    pub pair: AssetPair,
    pub uptrend_percentage: Option<f64>,
}

/// Buy eligibility and ordering over candidate pairs
pub struct StrategyRanker<'a> {
    params: &'a StrategyParameters,
}

impl<'a> StrategyRanker<'a> {
    pub fn new(params: &'a StrategyParameters) -> Self {
        StrategyRanker { params }
    }

    /// Percentage of the newest price above the largest trough in the
    /// configured look-back window
    pub fn uptrend_since_trough(&self, series: &PriceSeries, now: i64) -> Option<f64> {
        let newest = series.newest()?;
        let trough = series.largest_trough(self.params.buy_trough_max_age_ms(), now)?;
        Some(percentage(newest.price.to_f64(), trough.price.to_f64()))
    }

    /// Run the buy gate for `pair`
    pub fn check_buy(
        &self,
        pair: &AssetPair,
        series: &PriceSeries,
        trades: &[Trade],
        now: i64,
    ) -> BuyCheck {
        if let Some(max) = self.params.maximum_open_trades {
            let open = trades
                .iter()
                .filter(|t| t.status != TradeStatus::Closed)
                .count();
            if open >= max {
                return BuyCheck::MaxOpenTrades;
            }
        }

        if let Some(max) = self.params.maximum_open_trades_per_asset_pair {
            let open_for_pair = trades
                .iter()
                .filter(|t| {
                    t.asset_pair == *pair
                        && matches!(t.status, TradeStatus::Open | TradeStatus::BuyPending)
                })
                .count();
            if open_for_pair >= max {
                return BuyCheck::MaxOpenTradesForPair;
            }
        }

        match self.uptrend_since_trough(series, now) {
            None => BuyCheck::NoTrough,
            Some(uptrend) if uptrend < self.params.buy_trough_uptrend_percentage => {
                BuyCheck::WeakUptrend(uptrend)
            }
            Some(uptrend) => BuyCheck::Eligible(uptrend),
        }
    }

    pub fn should_buy(
        &self,
        pair: &AssetPair,
        series: &PriceSeries,
        trades: &[Trade],
        now: i64,
    ) -> bool {
        let check = self.check_buy(pair, series, trades, now);
        debug!("Buy check {}: {:?}", pair, check);
        check.is_eligible()
    }

    /// Order candidates by uptrend since trough, strongest first.
    ///
    /// Pairs without a qualifying trough are kept but pushed to the end.
    /// Ties keep their input order.
    pub fn rank<'s, I>(&self, candidates: I, now: i64) -> Vec<RankedPair>
    where
        I: IntoIterator<Item = (&'s AssetPair, &'s PriceSeries)>,
    {
        let mut ranked: Vec<RankedPair> = candidates
            .into_iter()
            .map(|(pair, series)| RankedPair {
                pair: pair.clone(),
                uptrend_percentage: self.uptrend_since_trough(series, now),
            })
            .collect();

        ranked.sort_by(|a, b| match (a.uptrend_percentage, b.uptrend_percentage) {
            (Some(a), Some(b)) => OrderedFloat(b).cmp(&OrderedFloat(a)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        ranked
    }
}
