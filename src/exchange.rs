//! Exchange access: price feeds and order execution
//!
//! [`TickerClient`] polls the CoinDCX public ticker for live prices,
//! [`ReplayFeed`] replays recorded prices from CSV, and [`OrderExecutor`] is
//! the seam through which the session fills its orders. Only paper fills are
//! implemented.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::error::{EngineError, EngineResult};
use crate::{AssetPair, Fee, Money, PriceSample};

/// Failures talking to the exchange
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("ticker request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ticker endpoint returned HTTP {0}")]
    Status(reqwest::StatusCode),
}

/// One market from the public ticker endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub market: String,
    pub last_price: String,
    #[serde(default)]
    pub bid: Option<String>,
    #[serde(default)]
    pub ask: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
    pub timestamp: i64,
}

/// Polls last traded prices for a fixed set of pairs
#[derive(Debug, Clone)]
pub struct TickerClient {
    url: String,
    client: reqwest::Client,
    /// Exchange market name (`BTCINR`) to pair
    markets: HashMap<String, AssetPair>,
}

impl TickerClient {
    pub fn new(config: &ExchangeConfig, pairs: &[AssetPair]) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(TickerClient {
            url: config.ticker_url.clone(),
            client,
            markets: pairs.iter().map(|p| (p.market(), p.clone())).collect(),
        })
    }

    /// Fetch the ticker and keep the configured pairs
    pub async fn fetch_samples(&self) -> Result<Vec<PriceSample>, ExchangeError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ExchangeError::Status(response.status()));
        }
        let tickers: Vec<Ticker> = response.json().await?;
        Ok(self.samples_from_tickers(tickers))
    }

    /// Convert raw tickers into samples. Unknown markets are ignored and
    /// unparseable prices are logged and skipped.
    pub fn samples_from_tickers(&self, tickers: Vec<Ticker>) -> Vec<PriceSample> {
        tickers
            .into_iter()
            .filter_map(|ticker| {
                let pair = self.markets.get(&ticker.market)?;
                match ticker.last_price.parse::<Money>() {
                    Ok(price) => Some(PriceSample {
                        pair: pair.clone(),
                        timestamp: to_millis(ticker.timestamp),
                        price,
                    }),
                    Err(e) => {
                        warn!("Skipping {} ticker: {}", ticker.market, e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Ticker timestamps come in seconds; anything already in ms is kept
fn to_millis(ts: i64) -> i64 {
    if ts < 100_000_000_000 {
        ts * 1000
    } else {
        ts
    }
}

/// CSV row: `pair,timestamp,price`
#[derive(Debug, Deserialize)]
struct ReplayRow {
    pair: AssetPair,
    timestamp: i64,
    price: Money,
}

/// Recorded prices grouped into ticks by timestamp, oldest first
#[derive(Debug, Clone, Default)]
pub struct ReplayFeed {
    ticks: Vec<(i64, Vec<PriceSample>)>,
}

impl ReplayFeed {
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())
            .context(format!("Failed to open replay file {}", path.as_ref().display()))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut grouped: BTreeMap<i64, Vec<PriceSample>> = BTreeMap::new();

        for (row_idx, result) in reader.deserialize::<ReplayRow>().enumerate() {
            let row = result.context(format!("Failed to read row {}", row_idx + 1))?;
            grouped.entry(row.timestamp).or_default().push(PriceSample {
                pair: row.pair,
                timestamp: row.timestamp,
                price: row.price,
            });
        }

        debug!("Loaded {} replay ticks", grouped.len());
        Ok(ReplayFeed {
            ticks: grouped.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Pairs that appear anywhere in the recording, sorted
    pub fn pairs(&self) -> Vec<AssetPair> {
        let mut pairs: Vec<AssetPair> = self
            .ticks
            .iter()
            .flat_map(|(_, samples)| samples.iter().map(|s| s.pair.clone()))
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    pub fn ticks(&self) -> impl Iterator<Item = (i64, &[PriceSample])> {
        self.ticks.iter().map(|(ts, samples)| (*ts, samples.as_slice()))
    }
}

/// Result of a filled order
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub price: Money,
    /// Base asset quantity
    pub amount: Money,
    pub fees: Vec<Fee>,
}

/// Places orders for the session
pub trait OrderExecutor {
    /// Spend `quote_amount` on `pair` at about `price`
    fn buy(&mut self, pair: &AssetPair, quote_amount: Money, price: Money) -> EngineResult<Fill>;

    /// Sell `amount` of the base asset at about `price`
    fn sell(&mut self, pair: &AssetPair, amount: Money, price: Money) -> EngineResult<Fill>;
}

/// Fills every order immediately at the quoted price, adjusted for slippage
#[derive(Debug, Clone, Default)]
pub struct PaperExecutor {
    fees: Vec<Fee>,
    slippage_percentage: f64,
}

impl PaperExecutor {
    pub fn new(fees: Vec<Fee>) -> Self {
        PaperExecutor {
            fees,
            slippage_percentage: 0.0,
        }
    }

    pub fn with_slippage(mut self, pct: f64) -> Self {
        self.slippage_percentage = pct;
        self
    }

    fn slipped(&self, price: Money, up: bool) -> Money {
        if self.slippage_percentage == 0.0 {
            return price;
        }
        let factor = if up {
            1.0 + self.slippage_percentage / 100.0
        } else {
            1.0 - self.slippage_percentage / 100.0
        };
        (price * Money::from_f64(factor)).round_dp(8)
    }
}

impl OrderExecutor for PaperExecutor {
    fn buy(&mut self, pair: &AssetPair, quote_amount: Money, price: Money) -> EngineResult<Fill> {
        if !price.is_positive() {
            return Err(EngineError::OrderRejected {
                pair: pair.clone(),
                reason: format!("invalid price {}", price),
            });
        }
        let price = self.slipped(price, true);
        let amount = (quote_amount / price).round_dp(8);
        if amount.is_zero() {
            return Err(EngineError::OrderRejected {
                pair: pair.clone(),
                reason: format!("{} buys nothing at {}", quote_amount, price),
            });
        }
        Ok(Fill {
            price,
            amount,
            fees: self.fees.clone(),
        })
    }

    fn sell(&mut self, pair: &AssetPair, amount: Money, price: Money) -> EngineResult<Fill> {
        if !price.is_positive() {
            return Err(EngineError::OrderRejected {
                pair: pair.clone(),
                reason: format!("invalid price {}", price),
            });
        }
        Ok(Fill {
            price: self.slipped(price, false),
            amount,
            fees: self.fees.clone(),
        })
    }
}
