//! Scripted in-memory provider for tests and offline runs.
//!
//! Serves bars from a per-symbol table, optionally replaying queued failures
//! first, and records every call so tests can assert on upstream traffic and
//! peak concurrency.

use super::provider::{BarProvider, FetchError};
use crate::domain::Bar;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One recorded `fetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Default)]
pub struct MockProvider {
    bars: Mutex<HashMap<String, Vec<Bar>>>,
    failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    calls: Mutex<Vec<FetchCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each call open for `latency` (to observe concurrency).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Replace the bars served for `symbol`.
    pub fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        lock(&self.bars).insert(symbol.to_string(), bars);
    }

    /// Append bars to what `symbol` serves.
    pub fn extend_bars(&self, symbol: &str, bars: Vec<Bar>) {
        lock(&self.bars)
            .entry(symbol.to_string())
            .or_default()
            .extend(bars);
    }

    /// Queue `err` to be returned by the next call for `symbol`.
    pub fn push_failure(&self, symbol: &str, err: FetchError) {
        lock(&self.failures)
            .entry(symbol.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, symbol: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.symbol == symbol).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Highest number of simultaneous `fetch` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BarProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        lock(&self.calls).push(FetchCall {
            symbol: symbol.to_string(),
            start,
            end,
        });

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        if let Some(err) = lock(&self.failures)
            .get_mut(symbol)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }

        Ok(lock(&self.bars)
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn is_available(&self) -> bool {
        true
    }
}
