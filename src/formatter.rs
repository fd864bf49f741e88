//! Human readable trend status for a price series

use itertools::Itertools;
use serde::Serialize;
use std::fmt;

use crate::price_series::PriceSeries;
use crate::{percentage, Money, PriceEntry};

/// Direction of the newest step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    fn symbol(self) -> &'static str {
        match self {
            Trend::Up => "▲",
            Trend::Down => "▼",
            Trend::Flat => "=",
        }
    }
}

/// Newest price relative to one reference extreme
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtremeDistance {
    pub price: Money,
    /// Newest price relative to the extreme, `((newest - extreme) / extreme) * 100`
    pub percentage: f64,
    /// Whole seconds since the extreme was sampled
    pub seconds_ago: i64,
}

impl ExtremeDistance {
    fn measure(newest: &PriceEntry, extreme: &PriceEntry, now: i64) -> Self {
        ExtremeDistance {
            price: extreme.price,
            percentage: percentage(newest.price.to_f64(), extreme.price.to_f64()),
            seconds_ago: ((now - extreme.timestamp) / 1000).max(0),
        }
    }
}

/// Read-only snapshot of a series' trend, as shown on status pages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub price: Money,
    pub trend: Trend,
    pub since_peak: Option<ExtremeDistance>,
    pub since_trough: Option<ExtremeDistance>,
}

impl TrendSummary {
    pub fn from_series(series: &PriceSeries, now: i64) -> Option<Self> {
        let newest = series.newest()?;
        let trend = match series.previous() {
            Some(prev) if newest.price > prev.price => Trend::Up,
            Some(prev) if newest.price < prev.price => Trend::Down,
            _ => Trend::Flat,
        };

        Some(TrendSummary {
            price: newest.price,
            trend,
            since_peak: series
                .last_peak()
                .map(|peak| ExtremeDistance::measure(newest, peak, now)),
            since_trough: series
                .last_trough()
                .map(|trough| ExtremeDistance::measure(newest, trough, now)),
        })
    }
}

impl fmt::Display for TrendSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = format!("{} {}", self.price, self.trend.symbol());
        let extremes = [("peak", &self.since_peak), ("trough", &self.since_trough)]
            .into_iter()
            .filter_map(|(label, distance)| {
                distance.as_ref().map(|d| {
                    format!(
                        "{} {} {:+.2}% {}s ago",
                        label, d.price, d.percentage, d.seconds_ago
                    )
                })
            });
        write!(f, "{}", std::iter::once(head).chain(extremes).join(" | "))
    }
}

/// Status line for a pair's series, e.g.
/// `1.1 ▲ | peak 1.4 -21.43% 5s ago | trough 0.9 +22.22% 1s ago`
pub fn price_text(series: &PriceSeries, now: i64) -> String {
    match TrendSummary::from_series(series, now) {
        Some(summary) => summary.to_string(),
        None => "no price data".to_string(),
    }
}
