//! Price series with streaming peak/trough detection
//!
//! A [`PriceSeries`] holds the append-only price history of one asset pair.
//! Every call to [`PriceSeries::process`] rebuilds the peak and trough index
//! sets and the per-step change log in a single forward pass:
//!
//! ```text
//! peak   at i-1  when p[i] < p[i-1] and the move into i-1 was rising or flat
//! trough at i-1  when p[i] > p[i-1] and the move into i-1 was falling or flat
//! ```
//!
//! Runs of identical prices (plateaus) are marked as a whole by walking back
//! from the detected index until the price differs. The newest sample is
//! additionally recorded as a peak (trough) when it is at or beyond the last
//! peak (trough), so a series ending on a fresh extreme can be queried without
//! waiting for a reversal.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::{percentage, Money, PriceEntry};

/// Relative move between two consecutive samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    /// `((price - prev_price) / prev_price) * 100`
    pub relative_price_percentage: f64,
    pub price: Money,
    pub prev_price: Money,
    pub timestamp: i64,
}

/// Price history and derived extrema for one asset pair
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    entries: Vec<PriceEntry>,
    peak_indexes: Vec<usize>,
    trough_indexes: Vec<usize>,
    changes: Vec<PriceChange>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from existing entries and process it
    pub fn from_entries(entries: Vec<PriceEntry>) -> Self {
        let mut series = PriceSeries {
            entries,
            ..Default::default()
        };
        series.process();
        series
    }

    /// Append a sample. Extrema are not updated until the next `process()`.
    ///
    /// Timestamps are expected to be non-decreasing; this is not validated.
    pub fn add_entry(&mut self, entry: PriceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PriceEntry] {
        &self.entries
    }

    pub fn peak_indexes(&self) -> &[usize] {
        &self.peak_indexes
    }

    pub fn trough_indexes(&self) -> &[usize] {
        &self.trough_indexes
    }

    pub fn changes(&self) -> &[PriceChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recompute peaks, troughs and changes from scratch.
    ///
    /// Needs at least two entries; shorter series end up with empty derived
    /// state.
    pub fn process(&mut self) {
        self.peak_indexes.clear();
        self.trough_indexes.clear();
        self.changes.clear();

        let n = self.entries.len();
        if n < 2 {
            return;
        }

        let entries = &self.entries;
        let first_price = entries[0].price;
        let mut peaks = Vec::new();
        let mut troughs = Vec::new();
        let mut changes = Vec::with_capacity(n - 1);

        // Direction of the move into i-1. Nothing precedes index 0, so it
        // counts as flat.
        let mut into_prev = Ordering::Equal;

        for i in 1..n {
            let prev = &entries[i - 1];
            let current = &entries[i];
            let step = current.price.cmp(&prev.price);

            match step {
                Ordering::Less if into_prev != Ordering::Less => {
                    mark_plateau(entries, &mut peaks, i - 1);
                }
                Ordering::Greater if into_prev != Ordering::Greater => {
                    // A flat opening run is not a trough
                    if !(prev.price == first_price && troughs.is_empty()) {
                        mark_plateau(entries, &mut troughs, i - 1);
                    }
                }
                _ => {}
            }

            changes.push(PriceChange {
                relative_price_percentage: percentage(
                    current.price.to_f64(),
                    prev.price.to_f64(),
                ),
                price: current.price,
                prev_price: prev.price,
                timestamp: current.timestamp,
            });
            into_prev = step;
        }

        // Newest sample extends the current trend. Peaks take precedence so
        // the two sets stay disjoint.
        let newest = n - 1;
        let newest_price = entries[newest].price;
        if peaks
            .last()
            .is_some_and(|&p| newest_price >= entries[p].price)
        {
            peaks.push(newest);
        } else if troughs
            .last()
            .is_some_and(|&t| newest_price <= entries[t].price)
        {
            troughs.push(newest);
        }

        self.peak_indexes = peaks;
        self.trough_indexes = troughs;
        self.changes = changes;
    }

    /// Most recent sample
    pub fn newest(&self) -> Option<&PriceEntry> {
        self.entries.last()
    }

    /// Sample before the newest one
    pub fn previous(&self) -> Option<&PriceEntry> {
        self.entries.len().checked_sub(2).map(|i| &self.entries[i])
    }

    pub fn last_peak(&self) -> Option<&PriceEntry> {
        self.peak_indexes.last().map(|&i| &self.entries[i])
    }

    pub fn last_trough(&self) -> Option<&PriceEntry> {
        self.trough_indexes.last().map(|&i| &self.entries[i])
    }

    /// Highest peak found scanning back from the newest peak.
    ///
    /// The scan stops at the first peak older than `max_age_ms` relative to
    /// `now`; earlier peaks are never considered, even if younger ones appear
    /// before them. `None` scans everything. Equal prices keep the most recent.
    pub fn largest_peak(&self, max_age_ms: Option<i64>, now: i64) -> Option<&PriceEntry> {
        self.scan_extreme(&self.peak_indexes, max_age_ms, now, Ordering::Greater)
    }

    /// Lowest trough found scanning back from the newest trough.
    ///
    /// Same cutoff rules as [`PriceSeries::largest_peak`].
    pub fn largest_trough(&self, max_age_ms: Option<i64>, now: i64) -> Option<&PriceEntry> {
        self.scan_extreme(&self.trough_indexes, max_age_ms, now, Ordering::Less)
    }

    fn scan_extreme(
        &self,
        indexes: &[usize],
        max_age_ms: Option<i64>,
        now: i64,
        wins: Ordering,
    ) -> Option<&PriceEntry> {
        let mut best: Option<&PriceEntry> = None;
        for &i in indexes.iter().rev() {
            let entry = &self.entries[i];
            if max_age_ms.is_some_and(|max_age| now - entry.timestamp > max_age) {
                break;
            }
            match best {
                Some(b) if entry.price.cmp(&b.price) != wins => {}
                _ => best = Some(entry),
            }
        }
        best
    }

    /// Drop `ceil(len * ratio)` of the oldest entries and reprocess.
    ///
    /// Returns the number of entries removed. Extrema older than the cut are
    /// gone for good.
    pub fn cleanup_entries(&mut self, ratio: f64) -> usize {
        let ratio = ratio.clamp(0.0, 1.0);
        let remove = ((self.entries.len() as f64) * ratio).ceil() as usize;
        let remove = remove.min(self.entries.len());
        self.entries.drain(..remove);
        self.process();
        remove
    }
}

/// Record `idx` plus every directly preceding sample with exactly the same
/// price, oldest first.
fn mark_plateau(entries: &[PriceEntry], indexes: &mut Vec<usize>, idx: usize) {
    let price = entries[idx].price;
    let mut start = idx;
    while start > 0 && entries[start - 1].price == price {
        start -= 1;
    }
    // Keep the set strictly increasing
    if let Some(&last) = indexes.last() {
        start = start.max(last + 1);
    }
    indexes.extend(start..=idx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FIXTURE: [&str; 21] = [
        "1.0", "1.0", "1.0", "1.2", "1.4", "1.5", "1.2", "0.8", "1.6", "1.6", "1.6", "1.2", "1.0",
        "1.0", "1.4", "1.4", "1.2", "0.9", "0.9", "0.9", "1.1",
    ];

    fn series_from(prices: &[&str]) -> PriceSeries {
        let entries = prices
            .iter()
            .enumerate()
            .map(|(i, p)| PriceEntry::parse(i as i64 * 1000, p).unwrap())
            .collect();
        PriceSeries::from_entries(entries)
    }

    fn entry(timestamp: i64, price: &str) -> PriceEntry {
        PriceEntry::parse(timestamp, price).unwrap()
    }

    #[test]
    fn test_fixture_extrema() {
        let series = series_from(&FIXTURE);

        assert_eq!(series.peak_indexes(), &[5, 8, 9, 10, 14, 15]);
        assert_eq!(series.trough_indexes(), &[7, 12, 13, 17, 18, 19]);

        assert_eq!(series.newest(), Some(&entry(20000, "1.1")));
        assert_eq!(series.last_peak(), Some(&entry(15000, "1.4")));
        assert_eq!(series.largest_peak(None, 20000), Some(&entry(10000, "1.6")));
        assert_eq!(series.last_trough(), Some(&entry(19000, "0.9")));
        assert_eq!(series.largest_trough(None, 20000), Some(&entry(7000, "0.8")));
    }

    #[test]
    fn test_newest_extends_peak() {
        let mut series = series_from(&FIXTURE);
        series.add_entry(entry(21000, "2.0"));
        series.process();

        assert_eq!(series.last_peak(), Some(&entry(21000, "2.0")));
        assert_eq!(series.peak_indexes().last(), Some(&21));
        assert!(!series.trough_indexes().contains(&21));
    }

    #[test]
    fn test_newest_extends_trough() {
        let mut series = series_from(&FIXTURE);
        series.add_entry(entry(21000, "0.1"));
        series.process();

        assert_eq!(series.last_trough(), Some(&entry(21000, "0.1")));
        // The reversal turns the previous newest sample into a peak
        assert_eq!(series.last_peak(), Some(&entry(20000, "1.1")));
    }

    #[test]
    fn test_cleanup_entries() {
        let mut series = series_from(&FIXTURE);

        assert_eq!(series.cleanup_entries(0.5), 11);
        assert_eq!(series.len(), 10);
        assert_eq!(series.entries()[0], entry(11000, "1.2"));

        series.add_entry(entry(21000, "1.3"));
        assert_eq!(series.cleanup_entries(0.5), 6);
        assert_eq!(series.len(), 5);
        assert_eq!(series.newest(), Some(&entry(21000, "1.3")));
    }

    #[test]
    fn test_cleanup_reindexes_extrema() {
        let mut series = series_from(&FIXTURE);
        series.cleanup_entries(0.5);

        // Remaining prices: 1.2 1.0 1.0 1.4 1.4 1.2 0.9 0.9 0.9 1.1
        // The new first sample opens on a decline, so it reads as a peak
        assert_eq!(series.peak_indexes(), &[0, 3, 4]);
        assert_eq!(series.trough_indexes(), &[1, 2, 6, 7, 8]);
        assert!(series
            .peak_indexes()
            .iter()
            .chain(series.trough_indexes())
            .all(|&i| i < series.len()));
    }

    #[test]
    fn test_cleanup_below_two_entries_clears_extrema() {
        let mut series = series_from(&["1.0", "2.0", "1.0"]);
        assert_eq!(series.peak_indexes(), &[1]);

        series.cleanup_entries(0.9);
        assert_eq!(series.len(), 0);
        assert!(series.peak_indexes().is_empty());
        assert!(series.changes().is_empty());
        assert_eq!(series.last_peak(), None);
    }

    #[test]
    fn test_process_is_idempotent() {
        let mut series = series_from(&FIXTURE);
        let peaks = series.peak_indexes().to_vec();
        let troughs = series.trough_indexes().to_vec();
        let changes = series.changes().to_vec();

        series.process();
        series.process();

        assert_eq!(series.peak_indexes(), peaks.as_slice());
        assert_eq!(series.trough_indexes(), troughs.as_slice());
        assert_eq!(series.changes(), changes.as_slice());
    }

    #[test]
    fn test_changes_log() {
        let series = series_from(&FIXTURE);
        let changes = series.changes();

        assert_eq!(changes.len(), 20);
        assert_eq!(changes[0].relative_price_percentage, 0.0);
        assert_eq!(changes[0].timestamp, 1000);

        // 1.2 -> 1.4
        let rise = &changes[3];
        assert_eq!(rise.prev_price, Money::new(dec!(1.2)));
        assert_eq!(rise.price, Money::new(dec!(1.4)));
        assert!((rise.relative_price_percentage - 16.666666666666668).abs() < 1e-9);

        // 1.5 -> 1.2
        assert!((changes[5].relative_price_percentage + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_equal_samples_have_no_extrema() {
        let series = series_from(&["1.0", "1.0"]);
        assert!(series.peak_indexes().is_empty());
        assert!(series.trough_indexes().is_empty());
        assert_eq!(series.changes().len(), 1);
    }

    #[test]
    fn test_single_sample_is_not_processed() {
        let series = series_from(&["1.0"]);
        assert!(series.changes().is_empty());
        assert_eq!(series.newest(), Some(&entry(0, "1.0")));
        assert_eq!(series.previous(), None);
    }

    #[test]
    fn test_rising_series_has_no_trough_until_decline() {
        let mut series = series_from(&["1.0", "1.1", "1.2", "1.3"]);
        assert!(series.trough_indexes().is_empty());
        assert!(series.peak_indexes().is_empty());

        series.add_entry(entry(4000, "1.25"));
        series.process();
        assert_eq!(series.peak_indexes(), &[3]);
        assert!(series.trough_indexes().is_empty());

        series.add_entry(entry(5000, "1.27"));
        series.process();
        assert_eq!(series.trough_indexes(), &[4]);
    }

    #[test]
    fn test_flat_opening_run_is_not_a_trough() {
        let series = series_from(&["2.0", "2.0", "2.5", "1.8", "1.8", "2.5"]);
        assert_eq!(series.trough_indexes(), &[3, 4]);
        assert_eq!(series.peak_indexes(), &[2, 5]);

        // Returning to the opening price before any trough exists is skipped too
        let series = series_from(&["2.0", "2.0", "2.5", "2.0", "2.0", "2.5"]);
        assert!(series.trough_indexes().is_empty());
        assert_eq!(series.peak_indexes(), &[2, 5]);
    }

    #[test]
    fn test_plateau_walk_stops_at_tiny_difference() {
        let series = series_from(&["1.0", "1.4999999", "1.5", "1.5", "1.2"]);
        assert_eq!(series.peak_indexes(), &[2, 3]);

        let series = series_from(&["1.0", "1.5", "1.5000001", "1.5", "1.2"]);
        assert_eq!(series.peak_indexes(), &[2]);
    }

    #[test]
    fn test_newest_equal_to_last_peak_counts_as_peak() {
        let series = series_from(&["1.0", "2.0", "1.5", "2.0"]);
        assert_eq!(series.peak_indexes(), &[1, 3]);
        assert_eq!(series.trough_indexes(), &[2]);
    }

    #[test]
    fn test_newest_equal_to_last_trough_counts_as_trough() {
        let series = series_from(&["2.0", "1.0", "1.5", "1.0"]);
        assert_eq!(series.peak_indexes(), &[0, 2]);
        assert_eq!(series.trough_indexes(), &[1, 3]);
    }

    #[test]
    fn test_peak_and_trough_sets_are_disjoint() {
        let series = series_from(&FIXTURE);
        assert!(series
            .peak_indexes()
            .iter()
            .all(|i| !series.trough_indexes().contains(i)));
        assert!(series.peak_indexes().windows(2).all(|w| w[0] < w[1]));
        assert!(series.trough_indexes().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_largest_trough_age_cutoff() {
        let series = series_from(&FIXTURE);

        // Scan reaches 19, 18, 17 then stops at 13 (7s old)
        assert_eq!(
            series.largest_trough(Some(5000), 20000),
            Some(&entry(19000, "0.9"))
        );
        // Exactly 13s old is still inside the window
        assert_eq!(
            series.largest_trough(Some(13000), 20000),
            Some(&entry(7000, "0.8"))
        );
        assert_eq!(
            series.largest_trough(Some(12999), 20000),
            Some(&entry(19000, "0.9"))
        );
        // Newest trough already too old
        assert_eq!(series.largest_trough(Some(1000), 30000), None);
    }

    #[test]
    fn test_largest_peak_age_cutoff() {
        let series = series_from(&FIXTURE);
        assert_eq!(
            series.largest_peak(Some(6000), 20000),
            Some(&entry(15000, "1.4"))
        );
        assert_eq!(
            series.largest_peak(Some(15000), 20000),
            Some(&entry(10000, "1.6"))
        );
    }

    #[test]
    fn test_empty_series_queries() {
        let series = PriceSeries::new();
        assert!(series.is_empty());
        assert_eq!(series.newest(), None);
        assert_eq!(series.last_peak(), None);
        assert_eq!(series.last_trough(), None);
        assert_eq!(series.largest_peak(None, 0), None);
        assert_eq!(series.largest_trough(None, 0), None);
    }
}
