//! Core data types used across the trading system

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing boundary data (prices, pair symbols)
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid asset pair '{0}', expected BASE/QUOTE")]
    InvalidPair(String),

    #[error("invalid decimal '{value}': {source}")]
    InvalidDecimal {
        value: String,
        #[source]
        source: rust_decimal::Error,
    },
}

/// Percentage of `a` relative to base `b`: `((a - b) / b) * 100`.
///
/// Evaluated in `f64` so results line up with exchange-side reporting.
/// A zero base yields `0.0` rather than infinity.
pub fn percentage(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return 0.0;
    }
    ((a - b) / b) * 100.0
}

/// Asset code using Arc<str> for cheap cloning
///
/// Symbols are cloned into every trade, fee and price sample. Using Arc<str>
/// keeps those clones allocation free.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref().to_ascii_uppercase().as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tradable pair, e.g. `BTC/INR`
///
/// Serialized as its `BASE/QUOTE` string form. `BASE-QUOTE` is accepted when
/// parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetPair {
    pub base: Symbol,
    pub quote: Symbol,
}

impl AssetPair {
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        AssetPair {
            base: Symbol::new(base),
            quote: Symbol::new(quote),
        }
    }

    /// Exchange market code, base and quote concatenated (`BTCINR`)
    pub fn market(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl std::fmt::Display for AssetPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for AssetPair {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .or_else(|| s.split_once('-'))
            .ok_or_else(|| ParseError::InvalidPair(s.to_string()))?;
        let (base, quote) = (base.trim(), quote.trim());
        if base.is_empty() || quote.is_empty() {
            return Err(ParseError::InvalidPair(s.to_string()));
        }
        Ok(AssetPair::new(base, quote))
    }
}

impl TryFrom<String> for AssetPair {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetPair> for String {
    fn from(pair: AssetPair) -> Self {
        pair.to_string()
    }
}

/// One timestamped price observation in a pair's series
///
/// Immutable once appended. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub timestamp: i64,
    pub price: Money,
}

impl PriceEntry {
    pub fn new(timestamp: i64, price: impl Into<Money>) -> Self {
        PriceEntry {
            timestamp,
            price: price.into(),
        }
    }

    /// Build an entry from the decimal string an exchange reports
    pub fn parse(timestamp: i64, price: &str) -> Result<Self, ParseError> {
        Ok(PriceEntry {
            timestamp,
            price: price.parse()?,
        })
    }
}

/// Price observation as pulled from the exchange, before it is routed to a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub pair: AssetPair,
    pub timestamp: i64,
    pub price: Money,
}

impl PriceSample {
    pub fn entry(&self) -> PriceEntry {
        PriceEntry::new(self.timestamp, self.price)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeType {
    Long,
    Short,
}

/// Trade lifecycle. Transitions are linear and a closed trade is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    BuyPending,
    Open,
    SellPending,
    Closed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeStatus::BuyPending => "BUY_PENDING",
            TradeStatus::Open => "OPEN",
            TradeStatus::SellPending => "SELL_PENDING",
            TradeStatus::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// How a fee is charged
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    /// Percentage of the traded notional (1.0 = 1%)
    Percentage(f64),
    /// Flat amount, denominated in `Fee::asset`
    Amount(Money),
}

/// Fee charged on an entry or exit fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub kind: FeeKind,
    /// Asset the fee is denominated in; `None` means the quote asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Symbol>,
}

impl Fee {
    pub fn percentage(pct: f64) -> Self {
        Fee {
            kind: FeeKind::Percentage(pct),
            asset: None,
        }
    }

    pub fn amount(value: impl Into<Money>, asset: Option<Symbol>) -> Self {
        Fee {
            kind: FeeKind::Amount(value.into()),
            asset,
        }
    }

    /// Fee expressed as a percentage of a trade.
    ///
    /// Flat fees in the base asset are measured against `amount`, anything
    /// else against the quote notional `price * amount`.
    pub fn as_percentage(&self, pair: &AssetPair, price: Money, amount: Money) -> f64 {
        match self.kind {
            FeeKind::Percentage(pct) => pct,
            FeeKind::Amount(value) => {
                let base = match &self.asset {
                    Some(asset) if *asset == pair.base => amount,
                    _ => price * amount,
                };
                if base.is_zero() {
                    0.0
                } else {
                    (value / base).to_f64() * 100.0
                }
            }
        }
    }
}

// ============================================================================
// Money Type - Precise Decimal Arithmetic for Prices and Amounts
// ============================================================================

use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Decimal value used for prices and traded amounts.
///
/// Wraps `rust_decimal::Decimal` so that plateau detection compares prices
/// exactly as the exchange reported them (`"1.10" == "1.1"`, but
/// `"1.1000001" != "1.1"`). Serialized as a string.
///
/// # Example
/// ```
/// use trend_trader::Money;
/// let price: Money = "100.50".parse().unwrap();
/// let qty = Money::from_f64(2.0);
/// assert_eq!((price * qty).to_f64(), 201.0);
/// ```
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    /// Zero value
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Money(value)
    }

    /// Create from f64
    /// Note: This conversion may lose precision for values with many decimal places
    pub fn from_f64(value: f64) -> Self {
        Money(Decimal::try_from(value).unwrap_or_else(|_| {
            // Fallback for extreme values (NaN, Infinity)
            if value.is_nan() || value.is_infinite() {
                Decimal::ZERO
            } else {
                Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
            }
        }))
    }

    /// Convert to f64 for percentage math
    pub fn to_f64(self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.0.to_f64().unwrap_or(0.0)
    }

    /// Check if value is zero
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Check if value is strictly positive
    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round to specified decimal places
    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }

    /// Get the underlying Decimal
    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Strip trailing zeros so "1.10" renders as the exchange sent "1.1"
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Money {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map(Money)
            .map_err(|source| ParseError::InvalidDecimal {
                value: s.to_string(),
                source,
            })
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money(value)
    }
}

impl From<f64> for Money {
    fn from(value: f64) -> Self {
        Money::from_f64(value)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::hash::Hash for Money {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.normalize().hash(state);
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl Mul for Money {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Money(self.0 * rhs.0)
    }
}

impl Div for Money {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        if rhs.0.is_zero() {
            Money::ZERO // Safe division by zero handling
        } else {
            Money(self.0 / rhs.0)
        }
    }
}
