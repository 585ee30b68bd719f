//! Sync coordinator: brings each symbol's stored series up to date.
//!
//! For every requested symbol the coordinator derives a fetch window from the
//! watermark, fetches through the retry policy, merges into the bar store and
//! advances the watermark. Symbols run on a private rayon pool whose size caps
//! the number of upstream calls in flight. A failing symbol is logged and
//! recorded in the report; it never aborts its siblings.

use super::clock::Clock;
use crate::cancel::CancelToken;
use crate::data::retry::{fetch_with_retry, RetryPolicy};
use crate::data::store::is_storable_symbol;
use crate::data::{BarProvider, BarStore, WatermarkStore};
use crate::error::{EngineError, StoreError, SyncError};
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Tunables for [`SyncCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Days of history requested for a symbol with no watermark.
    pub lookback_days: i64,
    /// Upper bound on concurrent upstream fetches.
    pub max_concurrent_fetches: usize,
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            lookback_days: 800,
            max_concurrent_fetches: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened to one symbol during a sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolOutcome {
    /// Watermark already covers today; no upstream call made.
    Fresh,
    /// Provider had nothing in the window.
    NoNewData,
    Updated {
        fetched: usize,
        latest: NaiveDate,
        stored: usize,
    },
    Failed {
        reason: String,
        /// The bar store was rewritten before the failure (watermark write failed).
        store_changed: bool,
    },
    Cancelled,
}

/// Per-symbol outcomes of one `ensure_fresh` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub outcomes: BTreeMap<String, SymbolOutcome>,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes.get(symbol)
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, SymbolOutcome::Failed { .. } | SymbolOutcome::Cancelled))
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.total() - self.failed()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// Symbols whose stored series changed and whose derived data is now stale.
    pub fn changed_symbols(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, o)| {
                matches!(
                    o,
                    SymbolOutcome::Updated { .. }
                        | SymbolOutcome::Failed {
                            store_changed: true,
                            ..
                        }
                )
            })
            .map(|(s, _)| s.clone())
            .collect()
    }
}

pub struct SyncCoordinator {
    provider: Arc<dyn BarProvider>,
    store: Arc<BarStore>,
    watermarks: WatermarkStore,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    pool: rayon::ThreadPool,
    symbol_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cancel: CancelToken,
}

impl SyncCoordinator {
    pub fn new(
        provider: Arc<dyn BarProvider>,
        store: Arc<BarStore>,
        watermarks: WatermarkStore,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
        cancel: CancelToken,
    ) -> Result<Self, EngineError> {
        if settings.max_concurrent_fetches == 0 {
            return Err(EngineError::Config(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.max_concurrent_fetches)
            .thread_name(|i| format!("trackfolio-sync-{i}"))
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build sync pool: {e}")))?;

        Ok(Self {
            provider,
            store,
            watermarks,
            clock,
            settings,
            pool,
            symbol_locks: Mutex::new(HashMap::new()),
            cancel,
        })
    }

    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    pub fn store(&self) -> &Arc<BarStore> {
        &self.store
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// First date to request for `symbol`: the day after its watermark, or
    /// the start of the lookback window for a never-synced symbol.
    pub fn fetch_start(&self, symbol: &str, today: NaiveDate) -> NaiveDate {
        match self.watermarks.get(symbol) {
            Some(mark) => mark + Duration::days(1),
            None => today - Duration::days(self.settings.lookback_days),
        }
    }

    /// Sync every symbol in `symbols` (duplicates collapse) and wait for all of them.
    pub fn ensure_fresh(&self, symbols: &[String]) -> SyncReport {
        let unique: Vec<String> = symbols
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let outcomes: BTreeMap<String, SymbolOutcome> = self.pool.install(|| {
            unique
                .par_iter()
                .map(|symbol| (symbol.clone(), self.sync_symbol(symbol)))
                .collect()
        });

        let report = SyncReport { outcomes };
        info!(
            total = report.total(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            changed = report.changed_symbols().len(),
            "sync complete"
        );
        report
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.symbol_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }

    /// Drop the lock entry for `symbol` once no other sync holds or awaits it.
    fn release_symbol_lock(&self, symbol: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.symbol_locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks.get(symbol).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(symbol);
        }
    }

    /// Number of symbols with a live per-symbol lock.
    pub fn active_symbol_locks(&self) -> usize {
        self.symbol_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Sync one symbol: fetch → merge → watermark, serialized per symbol.
    pub fn sync_symbol(&self, symbol: &str) -> SymbolOutcome {
        if !is_storable_symbol(symbol) {
            error!(symbol, "symbol cannot be stored, not fetching");
            return SymbolOutcome::Failed {
                reason: SyncError::from(StoreError::InvalidSymbol(symbol.to_string())).to_string(),
                store_changed: false,
            };
        }

        let lock = self.symbol_lock(symbol);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.sync_locked(symbol)
        };
        self.release_symbol_lock(symbol, lock);
        outcome
    }

    fn sync_locked(&self, symbol: &str) -> SymbolOutcome {
        let today = self.clock.today();
        let start = self.fetch_start(symbol, today);
        if start >= today {
            debug!(symbol, %start, "already fresh");
            return SymbolOutcome::Fresh;
        }
        if self.cancel.is_cancelled() {
            return SymbolOutcome::Cancelled;
        }

        debug!(symbol, %start, end = %today, "fetching");
        let bars = match fetch_with_retry(
            self.provider.as_ref(),
            symbol,
            start,
            today,
            &self.settings.retry,
            &self.cancel,
        ) {
            Ok(bars) => bars,
            Err(SyncError::Cancelled) => {
                warn!(symbol, "sync cancelled");
                return SymbolOutcome::Cancelled;
            }
            Err(e) => {
                error!(symbol, error = %e, "failed to fetch bars");
                return SymbolOutcome::Failed {
                    reason: e.to_string(),
                    store_changed: false,
                };
            }
        };

        let Some(latest) = bars.iter().map(|b| b.date).max() else {
            debug!(symbol, "no new bars");
            return SymbolOutcome::NoNewData;
        };
        let fetched = bars.len();

        let series = match self.store.merge(symbol, bars) {
            Ok(series) => series,
            Err(e) => {
                error!(symbol, error = %e, "failed to merge bars");
                return SymbolOutcome::Failed {
                    reason: SyncError::from(e).to_string(),
                    store_changed: false,
                };
            }
        };

        if let Err(e) = self.watermarks.set(symbol, latest) {
            error!(symbol, error = %e, "failed to persist watermark");
            return SymbolOutcome::Failed {
                reason: SyncError::from(e).to_string(),
                store_changed: true,
            };
        }

        info!(symbol, fetched, %latest, stored = series.len(), "updated");
        SymbolOutcome::Updated {
            fetched,
            latest,
            stored: series.len(),
        }
    }
}
