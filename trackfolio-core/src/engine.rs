//! Caller-facing engine: one state object owning the store, the sync
//! coordinator and the covariance cache.
//!
//! Read operations sync the symbols they touch first, then answer from the
//! local store. Every symbol whose series changed during a sync has its
//! cached covariances invalidated before the sync call returns.

use crate::cache::{CovarianceCache, KvStore, MemoryStore, RedisStore};
use crate::cancel::CancelToken;
use crate::config::{CacheBackend, CacheConfig, EngineConfig};
use crate::data::{
    AlpacaCredentials, AlpacaProvider, BarProvider, BarStore, CircuitBreaker, SeriesStatus,
    WatermarkStore,
};
use crate::domain::{Bar, Holding, ValuationPoint};
use crate::error::EngineError;
use crate::sync::{Clock, SyncCoordinator, SyncReport, SystemClock};
use crate::valuation;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Consecutive provider failures before the circuit breaker opens.
const BREAKER_FAILURE_THRESHOLD: u32 = 3;

/// Watermark plus stored-series summary for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolStatus {
    pub watermark: Option<NaiveDate>,
    #[serde(flatten)]
    pub series: SeriesStatus,
}

/// Open the configured covariance cache backend.
pub fn open_cache_backend(config: &CacheConfig) -> Result<Arc<dyn KvStore>, EngineError> {
    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        CacheBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| EngineError::Config("redis_url is not set".into()))?;
            Ok(Arc::new(RedisStore::connect(url)?))
        }
    }
}

pub struct RiskEngine {
    config: EngineConfig,
    store: Arc<BarStore>,
    coordinator: SyncCoordinator,
    cache: CovarianceCache,
    clock: Arc<dyn Clock>,
}

impl RiskEngine {
    /// Build an engine around explicit collaborators.
    ///
    /// Fails if the configuration is invalid or the watermark map cannot be
    /// read. Flushes cached covariances when `flush_cache_on_start` is set.
    pub fn open(
        config: EngineConfig,
        provider: Arc<dyn BarProvider>,
        backend: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let store = Arc::new(BarStore::new(config.bars_dir(), config.retention));
        let watermarks = WatermarkStore::open(config.watermarks_path())?;
        let coordinator = SyncCoordinator::new(
            provider,
            store.clone(),
            watermarks,
            clock.clone(),
            config.sync_settings(),
            CancelToken::new(),
        )?;
        let cache = CovarianceCache::new(backend, store.clone());
        if config.flush_cache_on_start {
            cache.flush()?;
        }

        info!(
            data_dir = %config.data_dir.display(),
            retention = config.retention,
            max_concurrent_fetches = config.max_concurrent_fetches,
            "risk engine ready"
        );
        Ok(Self {
            config,
            store,
            coordinator,
            cache,
            clock,
        })
    }

    /// Build an engine against Alpaca with credentials from the environment.
    pub fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        let credentials = AlpacaCredentials::from_env().ok_or_else(|| {
            EngineError::Config("ALPACA_API_KEY and ALPACA_SECRET_KEY must be set".into())
        })?;
        let breaker = Arc::new(CircuitBreaker::new(
            Duration::from_secs(config.provider.breaker_cooldown_secs),
            BREAKER_FAILURE_THRESHOLD,
        ));
        let provider = AlpacaProvider::new(credentials, &config.provider, breaker)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let backend = open_cache_backend(&config.cache)?;
        Self::open(config, Arc::new(provider), backend, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &BarStore {
        &self.store
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.coordinator.cancel_token()
    }

    /// Sync `symbols` and invalidate cached pairs of every changed symbol.
    ///
    /// A failed invalidation does not abort the rest; the cache keeps the
    /// symbol pending and retries before serving any of its pairs.
    pub fn ensure_fresh(&self, symbols: &[String]) -> SyncReport {
        let report = self.coordinator.ensure_fresh(symbols);
        for symbol in report.changed_symbols() {
            if let Err(e) = self.cache.invalidate(&symbol) {
                warn!(symbol, error = %e, "cache invalidation failed, left pending");
            }
        }
        report
    }

    /// Sync the configured universe.
    pub fn sync_universe(&self) -> SyncReport {
        self.ensure_fresh(&self.config.universe)
    }

    /// Sync before a read. Failures are logged; the read proceeds on whatever
    /// is stored.
    fn refresh(&self, symbols: &[String]) {
        let report = self.ensure_fresh(symbols);
        if !report.all_succeeded() {
            warn!(
                failed = report.failed(),
                total = report.total(),
                "serving from stored data after partial sync failure"
            );
        }
    }

    pub fn covariance(&self, a: &str, b: &str) -> Result<f64, EngineError> {
        self.refresh(&[a.to_string(), b.to_string()]);
        self.cache.get(a, b)
    }

    /// Covariance matrix in the order of `symbols`.
    pub fn covariance_matrix(&self, symbols: &[String]) -> Result<Vec<Vec<f64>>, EngineError> {
        self.refresh(symbols);
        self.cache.matrix(symbols)
    }

    /// Stored bars dated within the trailing `past_year_days`, oldest first.
    pub fn past_year_series(&self, symbol: &str) -> Vec<(NaiveDate, Bar)> {
        self.refresh(&[symbol.to_string()]);
        self.trailing(symbol)
    }

    fn trailing(&self, symbol: &str) -> Vec<(NaiveDate, Bar)> {
        self.store
            .load(symbol)
            .trailing(self.clock.today(), self.config.past_year_days)
    }

    /// Daily value, cost and unrealized profit of `holdings` over the trailing year.
    pub fn portfolio_value_series(
        &self,
        holdings: &[Holding],
    ) -> Result<Vec<ValuationPoint>, EngineError> {
        if holdings.is_empty() {
            return Err(EngineError::EmptyPortfolio);
        }
        let symbols: Vec<String> = holdings.iter().map(|h| h.symbol.clone()).collect();
        self.refresh(&symbols);

        let series: HashMap<String, BTreeMap<NaiveDate, Bar>> = symbols
            .iter()
            .map(|s| (s.clone(), self.trailing(s).into_iter().collect()))
            .collect();
        Ok(valuation::value_series(holdings, &series))
    }

    /// Most recent usable close in the store, without syncing.
    pub fn latest_close(&self, symbol: &str) -> Option<(NaiveDate, f64)> {
        self.store.load(symbol).latest_close()
    }

    pub fn status(&self, symbols: &[String]) -> Vec<SymbolStatus> {
        let watermarks = self.coordinator.watermarks();
        self.store
            .status(symbols)
            .into_iter()
            .map(|series| SymbolStatus {
                watermark: watermarks.get(&series.symbol),
                series,
            })
            .collect()
    }

    pub fn flush_cache(&self) -> Result<usize, EngineError> {
        Ok(self.cache.flush()?)
    }

    pub fn invalidate(&self, symbol: &str) -> Result<usize, EngineError> {
        Ok(self.cache.invalidate(symbol)?)
    }

    /// Symbols whose cached covariances could not be deleted yet.
    pub fn pending_invalidations(&self) -> Vec<String> {
        self.cache.pending_invalidations()
    }

    /// Cancel queued syncs and interrupt backoff waits. Later syncs report
    /// every symbol as cancelled.
    pub fn shutdown(&self) {
        info!("shutting down risk engine");
        self.coordinator.cancel_token().cancel();
    }
}
