use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle covering one fixed time bucket.
///
/// `open_time` is the identity key: the series holds at most one candle per
/// open time at any instant. Timestamps are epoch milliseconds with
/// `open_time < close_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// What a [`CandleSeries::merge`] call did with the incoming candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// An existing candle with the same open time was replaced in place —
    /// the still-open candle received another update.
    Updated,
    /// A new candle was appended at the end.
    Appended,
    /// A new candle was appended and the oldest one was evicted to stay
    /// within the cap.
    AppendedEvicted,
}

// ---------------------------------------------------------------------------
// CandleSeries — bounded append-or-update candle store
// ---------------------------------------------------------------------------

/// Bounded, time-ordered candle store backed by a ring buffer.
///
/// Seeded once from the history bootstrap, then fed incrementally by the
/// kline stream. An incoming candle either replaces the existing entry with
/// the same `open_time` (in place, same position) or is appended, evicting
/// the oldest entry when the cap is exceeded.
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleSeries {
    /// Create an empty series that retains at most `max_candles` entries.
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(max_candles + 1),
            max_candles,
        }
    }

    /// Merge one candle into the series.
    ///
    /// Scans from the newest end backward for an entry with the same
    /// `open_time` — updates almost always hit the live candle at the back.
    /// If found, the entry is replaced in place; otherwise the candle is
    /// appended and the front entry is evicted once the cap is exceeded.
    pub fn merge(&mut self, candle: Candle) -> MergeOutcome {
        if let Some(pos) = self
            .candles
            .iter()
            .rposition(|c| c.open_time == candle.open_time)
        {
            self.candles[pos] = candle;
            return MergeOutcome::Updated;
        }

        self.candles.push_back(candle);
        if self.candles.len() > self.max_candles {
            self.candles.pop_front();
            return MergeOutcome::AppendedEvicted;
        }
        MergeOutcome::Appended
    }

    /// Replace the entire contents with a freshly fetched history batch,
    /// keeping only the newest `max_candles` entries if the batch is larger.
    pub fn replace_all(&mut self, candles: Vec<Candle>) {
        self.candles.clear();
        let skip = candles.len().saturating_sub(self.max_candles);
        self.candles.extend(candles.into_iter().skip(skip));
    }

    /// Owned copy of the current contents, oldest first. Safe to hand to a
    /// consumer without aliasing the series itself.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// The most recently appended candle, if any.
    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn merge_appends_new_open_times() {
        let mut series = CandleSeries::new(10);

        assert_eq!(series.merge(sample_candle(0, 100.0)), MergeOutcome::Appended);
        assert_eq!(
            series.merge(sample_candle(60_000, 101.0)),
            MergeOutcome::Appended
        );
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn merge_replaces_in_place_on_repeated_open_time() {
        let mut series = CandleSeries::new(10);
        series.merge(sample_candle(0, 100.0));
        series.merge(sample_candle(60_000, 101.0));
        series.merge(sample_candle(120_000, 102.0));

        // Update the middle candle — same position, new value.
        let outcome = series.merge(sample_candle(60_000, 150.0));
        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(1).unwrap().close, 150.0);
        assert_eq!(series.get(1).unwrap().open_time, 60_000);
    }

    #[test]
    fn repeated_open_time_keeps_most_recent_value() {
        let mut series = CandleSeries::new(10);
        for close in [100.0, 101.5, 99.8, 103.2] {
            series.merge(sample_candle(0, close));
        }
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().close, 103.2);
    }

    #[test]
    fn cap_evicts_exactly_the_oldest() {
        let mut series = CandleSeries::new(3);
        for i in 0..3 {
            series.merge(sample_candle(i * 60_000, 100.0 + i as f64));
        }
        assert_eq!(series.len(), 3);

        let outcome = series.merge(sample_candle(180_000, 103.0));
        assert_eq!(outcome, MergeOutcome::AppendedEvicted);
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(0).unwrap().open_time, 60_000);
        assert_eq!(series.last().unwrap().open_time, 180_000);
    }

    #[test]
    fn update_at_cap_does_not_evict() {
        let mut series = CandleSeries::new(3);
        for i in 0..3 {
            series.merge(sample_candle(i * 60_000, 100.0 + i as f64));
        }

        let outcome = series.merge(sample_candle(120_000, 200.0));
        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(0).unwrap().open_time, 0);
    }

    #[test]
    fn bootstrap_then_live_updates() {
        // History bootstrap of 3 candles, then a live update of the last one
        // followed by a brand-new candle.
        let mut series = CandleSeries::new(100);
        series.replace_all(vec![
            sample_candle(1000, 10.0),
            sample_candle(1060, 11.0),
            sample_candle(1120, 12.0),
        ]);
        assert_eq!(series.len(), 3);

        series.merge(sample_candle(1120, 12.5));
        assert_eq!(series.len(), 3);
        assert_eq!(series.get(2).unwrap().close, 12.5);

        series.merge(sample_candle(1180, 13.0));
        assert_eq!(series.len(), 4);
        assert_eq!(series.last().unwrap().open_time, 1180);
    }

    #[test]
    fn replace_all_truncates_oversized_batch_to_newest() {
        let mut series = CandleSeries::new(3);
        series.replace_all((0..5).map(|i| sample_candle(i * 60_000, i as f64)).collect());

        assert_eq!(series.len(), 3);
        assert_eq!(series.get(0).unwrap().open_time, 120_000);
        assert_eq!(series.last().unwrap().open_time, 240_000);
    }

    #[test]
    fn snapshot_is_detached_from_the_series() {
        let mut series = CandleSeries::new(10);
        series.merge(sample_candle(0, 100.0));

        let snapshot = series.snapshot();
        series.merge(sample_candle(60_000, 101.0));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(series.len(), 2);
    }
}
