//! Engine configuration, loaded from TOML with environment overrides.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Credentials are never read from the file.

use crate::data::RetryPolicy;
use crate::error::EngineError;
use crate::sync::SyncSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DATA_DIR_ENV: &str = "TRACKFOLIO_DATA_DIR";
pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Root for bar files and the watermark map.
    pub data_dir: PathBuf,

    /// Maximum bars retained per symbol.
    pub retention: usize,

    /// Days of history fetched for a never-synced symbol.
    pub lookback_days: i64,

    pub max_concurrent_fetches: usize,

    pub rate_limit_backoff_secs: u64,

    pub max_rate_limit_retries: u32,

    /// Width of the trailing window served by `past_year_series`.
    pub past_year_days: i64,

    pub flush_cache_on_start: bool,

    /// Symbols synced by `RiskEngine::sync_universe`.
    pub universe: Vec<String>,

    pub provider: ProviderConfig,

    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            retention: 500,
            lookback_days: 800,
            max_concurrent_fetches: 5,
            rate_limit_backoff_secs: 10,
            max_rate_limit_retries: 5,
            past_year_days: 365,
            flush_cache_on_start: true,
            universe: Vec::new(),
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Overlay `TRACKFOLIO_DATA_DIR` and `REDIS_URL` when set.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(DATA_DIR_ENV).ok(),
            std::env::var(REDIS_URL_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, data_dir: Option<String>, redis_url: Option<String>) {
        if let Some(dir) = data_dir.filter(|d| !d.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = redis_url.filter(|u| !u.trim().is_empty()) {
            self.cache.redis_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.retention == 0 {
            return Err(EngineError::Config("retention must be at least 1".into()));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(EngineError::Config(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        if self.lookback_days <= 0 {
            return Err(EngineError::Config(
                "lookback_days must be positive".into(),
            ));
        }
        if self.past_year_days < 0 {
            return Err(EngineError::Config(
                "past_year_days must not be negative".into(),
            ));
        }
        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_none() {
            return Err(EngineError::Config(
                "cache backend is redis but no redis_url is configured".into(),
            ));
        }
        Ok(())
    }

    pub fn bars_dir(&self) -> PathBuf {
        self.data_dir.join("bars")
    }

    pub fn watermarks_path(&self) -> PathBuf {
        self.data_dir.join("watermarks.json")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_rate_limit_retries,
            backoff: Duration::from_secs(self.rate_limit_backoff_secs),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            lookback_days: self.lookback_days,
            max_concurrent_fetches: self.max_concurrent_fetches,
            retry: self.retry_policy(),
        }
    }
}

/// Upstream market-data provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Bars requested per page.
    pub page_limit: u32,
    pub timeout_secs: u64,
    pub breaker_cooldown_secs: u64,
    /// Optional data feed (`iex`, `sip`); provider default when unset.
    pub feed: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.alpaca.markets".to_string(),
            page_limit: 1000,
            timeout_secs: 30,
            breaker_cooldown_secs: 1800,
            feed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.retention, 500);
        assert_eq!(config.provider.page_limit, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let config = EngineConfig::from_toml(
            r#"
            data_dir = "/var/lib/trackfolio"
            max_concurrent_fetches = 2
            universe = ["AAPL", "MSFT"]

            [provider]
            feed = "iex"

            [cache]
            backend = "redis"
            redis_url = "redis://127.0.0.1/"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/trackfolio"));
        assert_eq!(config.max_concurrent_fetches, 2);
        assert_eq!(config.lookback_days, 800);
        assert_eq!(config.universe, vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(config.provider.feed.as_deref(), Some("iex"));
        assert_eq!(config.provider.timeout_secs, 30);
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(
            config.watermarks_path(),
            PathBuf::from("/var/lib/trackfolio/watermarks.json")
        );
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml("retention = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = EngineConfig::default();
        config.retention = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.max_concurrent_fetches = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.lookback_days = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cache.backend = CacheBackend::Redis;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_when_non_empty() {
        let mut config = EngineConfig::default();
        config.apply_overrides(Some("/tmp/tf".into()), Some(String::new()));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tf"));
        assert_eq!(config.cache.redis_url, None);

        config.apply_overrides(None, Some("redis://cache/".into()));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tf"));
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://cache/"));
    }

    #[test]
    fn derived_policies_follow_config() {
        let mut config = EngineConfig::default();
        config.rate_limit_backoff_secs = 3;
        config.max_rate_limit_retries = 7;
        let settings = config.sync_settings();
        assert_eq!(settings.retry.backoff, Duration::from_secs(3));
        assert_eq!(settings.retry.max_retries, 7);
        assert_eq!(settings.max_concurrent_fetches, 5);
    }
}
