//! Bar and BarSeries: the fundamental market data units.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Daily OHLCV bar for a single symbol.
///
/// Fields the provider omitted are stored as NaN. A bar is identified by
/// (symbol, date); the symbol lives on the owning [`BarSeries`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Returns true if the close can participate in a return calculation:
    /// present, finite and strictly positive.
    pub fn has_usable_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

/// Chronologically ordered bars for one symbol, at most one per date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    symbol: String,
    bars: BTreeMap<NaiveDate, Bar>,
}

impl BarSeries {
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: BTreeMap::new(),
        }
    }

    /// Build a series from bars in any order. Later bars win on duplicate dates.
    pub fn from_bars(symbol: impl Into<String>, bars: impl IntoIterator<Item = Bar>) -> Self {
        let mut series = Self::empty(symbol);
        for bar in bars {
            series.bars.insert(bar.date, bar);
        }
        series
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bars in ascending date order.
    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.values()
    }

    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars.values().cloned().collect()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&Bar> {
        self.bars.get(&date)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.keys().next_back().copied()
    }

    /// Most recent bar whose close is usable.
    pub fn latest_close(&self) -> Option<(NaiveDate, f64)> {
        self.bars
            .values()
            .rev()
            .find(|b| b.has_usable_close())
            .map(|b| (b.date, b.close))
    }

    /// Merge `incoming` into the series and evict the oldest dates beyond
    /// `retention`.
    ///
    /// Incoming bars overwrite existing bars on the same date. Returns the
    /// number of bars evicted.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Bar>, retention: usize) -> usize {
        for bar in incoming {
            self.bars.insert(bar.date, bar);
        }

        let excess = self.bars.len().saturating_sub(retention);
        if excess == 0 {
            return 0;
        }
        // Split at the first retained date; everything before it is evicted.
        if let Some(&cutoff) = self.bars.keys().nth(excess) {
            self.bars = self.bars.split_off(&cutoff);
        } else {
            self.bars.clear();
        }
        excess
    }

    /// Bars from the last `days` calendar days ending at `today`, oldest first.
    pub fn trailing(&self, today: NaiveDate, days: i64) -> Vec<(NaiveDate, Bar)> {
        let since = today - Duration::days(days - 1);
        self.bars
            .range(since..)
            .map(|(date, bar)| (*date, bar.clone()))
            .collect()
    }
}
