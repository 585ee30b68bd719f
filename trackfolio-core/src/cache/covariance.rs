//! Pairwise covariance cache over stored bar series.
//!
//! Keys are canonical: the pair is ordered lexicographically before every
//! lookup or write (`cov:<lo>:<hi>`), so cov(A,B) and cov(B,A) share one
//! entry and one computation. Entries never expire on their own; they are
//! dropped by [`CovarianceCache::invalidate`] when a symbol's series changes
//! and by [`CovarianceCache::flush`].

use super::kv::KvStore;
use crate::data::BarStore;
use crate::error::{CacheError, EngineError};
use crate::stats;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const KEY_PREFIX: &str = "cov:";

/// Order a symbol pair canonically.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub fn pair_key(a: &str, b: &str) -> String {
    let (lo, hi) = canonical_pair(a, b);
    format!("{KEY_PREFIX}{lo}:{hi}")
}

/// Split a cache key back into its two symbols.
pub fn parse_pair_key(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(KEY_PREFIX)?.split_once(':')
}

/// Invalidation state. A computed value is only written back if neither
/// symbol was invalidated (and nothing was flushed) while it was computed.
///
/// `pending` holds symbols whose invalidation failed at the backend. Their
/// cached pairs may be stale, so they are never served until a retry succeeds.
#[derive(Debug, Default)]
struct Epochs {
    flushes: u64,
    per_symbol: HashMap<String, u64>,
    pending: BTreeSet<String>,
}

impl Epochs {
    fn snapshot(&self, lo: &str, hi: &str) -> (u64, u64, u64) {
        let of = |s: &str| self.per_symbol.get(s).copied().unwrap_or(0);
        (self.flushes, of(lo), of(hi))
    }

    fn is_pending(&self, lo: &str, hi: &str) -> bool {
        self.pending.contains(lo) || self.pending.contains(hi)
    }
}

/// Epoch snapshot taken before a computation starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    epoch: (u64, u64, u64),
    trusted: bool,
}

pub struct CovarianceCache {
    backend: Arc<dyn KvStore>,
    store: Arc<BarStore>,
    epochs: Mutex<Epochs>,
}

impl CovarianceCache {
    pub fn new(backend: Arc<dyn KvStore>, store: Arc<BarStore>) -> Self {
        Self {
            backend,
            store,
            epochs: Mutex::new(Epochs::default()),
        }
    }

    fn epochs(&self) -> MutexGuard<'_, Epochs> {
        self.epochs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Covariance of the two symbols' log returns, served from cache when possible.
    pub fn get(&self, a: &str, b: &str) -> Result<f64, EngineError> {
        let (lo, hi) = canonical_pair(a, b);
        let key = pair_key(lo, hi);
        let ticket = self.ticket(lo, hi);

        if !ticket.trusted {
            debug!(key = %key, "invalidation pending, bypassing cache");
        } else if let Some(raw) = self.backend.get(&key)? {
            match raw.parse::<f64>() {
                Ok(value) => {
                    debug!(key = %key, "cache hit");
                    return Ok(value);
                }
                Err(_) => warn!(key = %key, raw = %raw, "unparseable cached value, recomputing"),
            }
        }

        let value = self.compute(lo, hi)?;
        self.write_back(&key, lo, hi, ticket, value)?;
        Ok(value)
    }

    fn ticket(&self, lo: &str, hi: &str) -> Ticket {
        let mut epochs = self.epochs();
        self.retry_pending(&mut epochs);
        Ticket {
            epoch: epochs.snapshot(lo, hi),
            trusted: !epochs.is_pending(lo, hi),
        }
    }

    /// Store `value` unless the pair was invalidated since `ticket` was taken.
    fn write_back(
        &self,
        key: &str,
        lo: &str,
        hi: &str,
        ticket: Ticket,
        value: f64,
    ) -> Result<bool, CacheError> {
        let epochs = self.epochs();
        if !ticket.trusted || epochs.is_pending(lo, hi) || epochs.snapshot(lo, hi) != ticket.epoch
        {
            debug!(key, "series changed during computation, not caching");
            return Ok(false);
        }
        self.backend.set(key, &value.to_string())?;
        debug!(key, value, "cached");
        Ok(true)
    }

    fn compute(&self, lo: &str, hi: &str) -> Result<f64, EngineError> {
        let a = self.store.load(lo);
        if lo == hi {
            let returns = stats::log_returns(a.iter());
            return Ok(stats::variance(&returns)?);
        }
        let b = self.store.load(hi);
        Ok(stats::series_covariance(a.iter(), b.iter())?)
    }

    /// Covariance matrix in the order of `symbols`; diagonal entries are variances.
    pub fn matrix(&self, symbols: &[String]) -> Result<Vec<Vec<f64>>, EngineError> {
        let n = symbols.len();
        let mut m = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let value = self.get(&symbols[i], &symbols[j])?;
                m[i][j] = value;
                m[j][i] = value;
            }
        }
        Ok(m)
    }

    /// Delete every cached pair for which `involves(lo, hi)` holds.
    fn drop_pairs(&self, involves: impl Fn(&str, &str) -> bool) -> Result<usize, CacheError> {
        let stale: Vec<String> = self
            .backend
            .keys_with_prefix(KEY_PREFIX)?
            .into_iter()
            .filter(|k| parse_pair_key(k).is_some_and(|(lo, hi)| involves(lo, hi)))
            .collect();
        self.backend.delete(&stale)
    }

    fn retry_pending(&self, epochs: &mut Epochs) {
        if epochs.pending.is_empty() {
            return;
        }
        let pending = &epochs.pending;
        match self.drop_pairs(|lo, hi| pending.contains(lo) || pending.contains(hi)) {
            Ok(removed) => {
                info!(symbols = pending.len(), removed, "retried pending invalidations");
                epochs.pending.clear();
            }
            Err(e) => warn!(error = %e, "pending invalidations still failing"),
        }
    }

    /// Drop every cached pair involving `symbol`.
    ///
    /// On a backend failure the symbol stays pending: its pairs are bypassed
    /// on read and the deletion is retried on the next lookup.
    pub fn invalidate(&self, symbol: &str) -> Result<usize, CacheError> {
        let mut epochs = self.epochs();
        *epochs.per_symbol.entry(symbol.to_string()).or_default() += 1;

        match self.drop_pairs(|lo, hi| lo == symbol || hi == symbol) {
            Ok(removed) => {
                epochs.pending.remove(symbol);
                debug!(symbol, removed, "invalidated cached pairs");
                Ok(removed)
            }
            Err(e) => {
                epochs.pending.insert(symbol.to_string());
                Err(e)
            }
        }
    }

    /// Symbols whose cached pairs are awaiting a successful invalidation.
    pub fn pending_invalidations(&self) -> Vec<String> {
        self.epochs().pending.iter().cloned().collect()
    }

    /// Drop every cached covariance.
    pub fn flush(&self) -> Result<usize, CacheError> {
        let mut epochs = self.epochs();
        epochs.flushes += 1;

        let keys = self.backend.keys_with_prefix(KEY_PREFIX)?;
        let removed = self.backend.delete(&keys)?;
        epochs.pending.clear();
        info!(removed, "flushed covariance cache");
        Ok(removed)
    }
}
