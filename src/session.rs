//! Trading session orchestration
//!
//! A [`Session`] owns the price series for every pair, the trades it opened,
//! and the executor and store it trades through. One [`Session::tick`] is one
//! scheduler round:
//!
//! 1. ingest the latest price samples
//! 2. re-process every series, halving them all if that blew the time budget
//! 3. evaluate sells for open trades
//! 4. rank pairs and evaluate buys
//!
//! The session is single-threaded; the caller serializes ticks.

use chrono::Utc;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::exchange::OrderExecutor;
use crate::formatter::price_text;
use crate::price_series::PriceSeries;
use crate::store::{SessionSnapshot, SessionStore, StoreError};
use crate::strategy::{StrategyParameters, StrategyRanker};
use crate::trade::Trade;
use crate::{AssetPair, Money, PriceSample, TradeStatus, TradeType};

/// Default wall-clock budget for processing all series in one tick
pub const DEFAULT_PROCESS_BUDGET: Duration = Duration::from_millis(200);

/// What happened during one tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub processing: Duration,
    /// Series were halved because processing exceeded the budget
    pub trimmed: bool,
    pub sold: Vec<String>,
    pub bought: Vec<String>,
}

pub struct Session<E: OrderExecutor, S: SessionStore> {
    id: String,
    params: StrategyParameters,
    series: BTreeMap<AssetPair, PriceSeries>,
    trades: Vec<Trade>,
    next_seq: u32,
    process_budget: Duration,
    executor: E,
    store: S,
}

impl<E: OrderExecutor, S: SessionStore> Session<E, S> {
    pub fn new(params: StrategyParameters, executor: E, store: S) -> Self {
        Session {
            id: Utc::now().format("%Y%m%dT%H%M%S").to_string(),
            params,
            series: BTreeMap::new(),
            trades: Vec::new(),
            next_seq: 1,
            process_budget: DEFAULT_PROCESS_BUDGET,
            executor,
            store,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Pre-register pairs so they are ranked before their first sample arrives
    pub fn with_pairs(mut self, pairs: &[AssetPair]) -> Self {
        for pair in pairs {
            self.series.entry(pair.clone()).or_default();
        }
        self
    }

    pub fn with_process_budget(mut self, budget: Duration) -> Self {
        self.process_budget = budget;
        self
    }

    /// Adopt the id and trades of the last saved snapshot, if any.
    ///
    /// No series are registered here. An active trade on a pair that is no
    /// longer fed fails the next tick with `MissingPriceSeries`.
    pub fn resume(mut self) -> Result<Self, StoreError> {
        let Some(snapshot) = self.store.load()? else {
            info!("No saved session, starting {}", self.id);
            return Ok(self);
        };

        info!(
            "Resumed session {} with {} trades ({} active)",
            snapshot.session_id,
            snapshot.trades.len(),
            snapshot.trades.iter().filter(|t| !t.is_closed()).count()
        );
        self.id = snapshot.session_id;
        self.next_seq = snapshot.next_seq;
        self.trades = snapshot.trades;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &StrategyParameters {
        &self.params
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn series(&self, pair: &AssetPair) -> Option<&PriceSeries> {
        self.series.get(pair)
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| !t.is_closed())
    }

    pub fn closed_trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| t.is_closed())
    }

    /// Realized profit of all closed trades in the quote asset, after fees
    pub fn realized_profit(&self) -> Money {
        self.closed_trades()
            .filter_map(|t| t.profit_amount(true))
            .fold(Money::ZERO, |acc, p| acc + p)
    }

    /// Append samples to their series. Unknown pairs get a fresh series.
    ///
    /// Samples not newer than the series' newest entry are dropped; the
    /// ticker repeats its last trade until a new one happens.
    pub fn ingest(&mut self, samples: &[PriceSample]) {
        for sample in samples {
            let series = self.series.entry(sample.pair.clone()).or_default();
            if series
                .newest()
                .is_some_and(|newest| newest.timestamp >= sample.timestamp)
            {
                debug!("{}: skipping stale sample at {}", sample.pair, sample.timestamp);
                continue;
            }
            series.add_entry(sample.entry());
        }
    }

    /// Re-run extremum detection on every series
    pub fn process_series(&mut self) -> (Duration, bool) {
        let started = Instant::now();
        for series in self.series.values_mut() {
            series.process();
        }
        let elapsed = started.elapsed();
        let trimmed = self.apply_backpressure(elapsed);
        (elapsed, trimmed)
    }

    /// Halve every series when processing took longer than the budget.
    /// Returns whether anything was trimmed.
    pub fn apply_backpressure(&mut self, elapsed: Duration) -> bool {
        if elapsed <= self.process_budget {
            return false;
        }
        warn!(
            "Processing {} series took {:?} (budget {:?}), dropping oldest half",
            self.series.len(),
            elapsed,
            self.process_budget
        );
        for (pair, series) in self.series.iter_mut() {
            let removed = series.cleanup_entries(0.5);
            debug!("{}: dropped {} entries, {} left", pair, removed, series.len());
        }
        true
    }

    /// Evaluate exits for every active trade and settle pending ones.
    ///
    /// Fails when a trade's pair has no series; that is state corruption the
    /// scheduler has to handle. Each exit fill is persisted before the next
    /// trade is looked at.
    pub fn evaluate_sells(&mut self, now: i64) -> EngineResult<Vec<String>> {
        let mut sold = Vec::new();

        for idx in 0..self.trades.len() {
            let trade = &mut self.trades[idx];
            if trade.is_closed() {
                continue;
            }
            let Some(series) = self.series.get(&trade.asset_pair) else {
                return Err(EngineError::MissingPriceSeries {
                    pair: trade.asset_pair.clone(),
                    trade_id: trade.id.clone(),
                });
            };

            if trade.is_open() {
                if let Some(reason) = trade.should_sell(series, &self.params, now, true) {
                    trade.request_exit(reason)?;
                }
            }
            if trade.status != TradeStatus::SellPending {
                continue;
            }

            let Some(newest) = series.newest() else {
                warn!("{}", EngineError::NoPrice(trade.asset_pair.clone()));
                continue;
            };
            match self
                .executor
                .sell(&trade.asset_pair, trade.amount, newest.price)
            {
                Ok(fill) => {
                    trade.fill_exit(fill.price, fill.fees, now)?;
                    sold.push(trade.id.clone());
                    self.persist();
                }
                Err(e) if !e.is_fatal() => {
                    warn!("Sell for {} not filled, retrying next tick: {}", trade.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(sold)
    }

    /// Buy the strongest eligible pairs, re-checking limits after every fill
    pub fn evaluate_buys(&mut self, now: i64) -> EngineResult<Vec<String>> {
        let ranker = StrategyRanker::new(&self.params);
        let ranked = ranker.rank(self.series.iter(), now);
        let mut bought = Vec::new();

        for candidate in ranked {
            let Some(series) = self.series.get(&candidate.pair) else {
                continue;
            };
            if !ranker.should_buy(&candidate.pair, series, &self.trades, now) {
                continue;
            }
            let Some(newest) = series.newest() else {
                continue;
            };

            let fill = match self
                .executor
                .buy(&candidate.pair, self.params.trade_amount, newest.price)
            {
                Ok(fill) => fill,
                Err(e) if !e.is_fatal() => {
                    warn!("Buy for {} not filled: {}", candidate.pair, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let id = Trade::make_id(&self.id, &candidate.pair, self.next_seq);
            self.next_seq += 1;
            let mut trade = Trade::new(id, candidate.pair.clone(), TradeType::Long, fill.amount);
            trade.fill_entry(fill.price, fill.fees, now)?;
            bought.push(trade.id.clone());
            self.trades.push(trade);
            self.persist();
        }

        Ok(bought)
    }

    /// Run one scheduler round at `now` (Unix ms)
    pub fn tick(&mut self, samples: &[PriceSample], now: i64) -> EngineResult<TickReport> {
        self.ingest(samples);
        let (processing, trimmed) = self.process_series();
        let sold = self.evaluate_sells(now)?;
        let bought = self.evaluate_buys(now)?;

        debug!(
            "Tick {}: {} samples, processed in {:?}, sold {}, bought {}",
            now,
            samples.len(),
            processing,
            sold.len(),
            bought.len()
        );
        Ok(TickReport {
            processing,
            trimmed,
            sold,
            bought,
        })
    }

    /// One status line per pair
    pub fn status_lines(&self, now: i64) -> Vec<String> {
        self.series
            .iter()
            .map(|(pair, series)| format!("{}: {}", pair, price_text(series, now)))
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            saved_at: Utc::now(),
            next_seq: self.next_seq,
            trades: self.trades.clone(),
        }
    }

    /// Save a snapshot. Failures are logged and trading continues.
    pub fn persist(&self) {
        if let Err(e) = self.store.save(&self.snapshot()) {
            warn!("Failed to save session state: {}", e);
        }
    }
}
