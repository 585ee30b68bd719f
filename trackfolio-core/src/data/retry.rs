//! Bounded retry with fixed backoff for rate-limited fetches.

use super::provider::{BarProvider, FetchError};
use crate::cancel::CancelToken;
use crate::domain::Bar;
use crate::error::SyncError;
use chrono::NaiveDate;
use std::time::Duration;
use tracing::warn;

/// How to react to [`FetchError::RateLimited`].
///
/// Only rate limiting is retried. After `max_retries` additional attempts
/// the symbol's sync fails with [`SyncError::RetriesExhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Fetch `[start, end]` for `symbol`, backing off on rate limits.
pub fn fetch_with_retry(
    provider: &dyn BarProvider,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<Vec<Bar>, SyncError> {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        attempt += 1;

        match provider.fetch(symbol, start, end) {
            Ok(bars) => return Ok(bars),
            Err(FetchError::RateLimited { retry_after_secs }) => {
                if attempt > policy.max_retries {
                    return Err(SyncError::RetriesExhausted { attempts: attempt });
                }
                warn!(
                    symbol,
                    attempt,
                    ?retry_after_secs,
                    backoff_secs = policy.backoff.as_secs_f64(),
                    "rate limited, backing off"
                );
                if cancel.wait(policy.backoff) {
                    return Err(SyncError::Cancelled);
                }
            }
            Err(err) => return Err(SyncError::Fetch(err)),
        }
    }
}
