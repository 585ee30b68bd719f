//! Bar provider trait and structured fetch errors.
//!
//! The BarProvider trait abstracts over upstream market-data sources so the
//! sync coordinator can be driven by Alpaca in production and by a scripted
//! provider in tests.

use crate::domain::Bar;
use chrono::NaiveDate;
use thiserror::Error;

/// Failures an upstream fetch can report.
///
/// `RateLimited` is the only retryable variant; the retry policy lives with
/// the caller (see [`super::retry`]).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

/// Trait for upstream daily-bar providers.
pub trait BarProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily bars for `symbol` in `[start, end]`, oldest first.
    ///
    /// An empty vector means the provider has no data in range.
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<Bar>, FetchError>;

    /// Check if the provider is currently accepting requests.
    fn is_available(&self) -> bool;
}
