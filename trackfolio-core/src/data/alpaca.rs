//! Alpaca Market Data v2 provider.
//!
//! Fetches daily bars from `/v2/stocks/{symbol}/bars`, following
//! `next_page_token` until the range is exhausted. HTTP 429 is surfaced as
//! [`FetchError::RateLimited`] so the caller's retry policy can back off;
//! everything else maps to [`FetchError::Unavailable`].

use super::circuit_breaker::CircuitBreaker;
use super::provider::{BarProvider, FetchError};
use crate::config::ProviderConfig;
use crate::domain::Bar;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on pages per fetch; a daily range never needs more.
const MAX_PAGES: usize = 64;

/// API key pair sent as `APCA-API-KEY-ID` / `APCA-API-SECRET-KEY`.
#[derive(Clone)]
pub struct AlpacaCredentials {
    pub key_id: String,
    pub secret_key: String,
}

impl AlpacaCredentials {
    /// Read `ALPACA_API_KEY` and `ALPACA_SECRET_KEY`.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            key_id: std::env::var("ALPACA_API_KEY").ok()?,
            secret_key: std::env::var("ALPACA_SECRET_KEY").ok()?,
        })
    }
}

impl fmt::Debug for AlpacaCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlpacaCredentials")
            .field("key_id", &self.key_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    bars: Option<Vec<AlpacaBar>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: DateTime<Utc>,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    c: Option<f64>,
    v: Option<f64>,
}

pub struct AlpacaProvider {
    client: reqwest::blocking::Client,
    credentials: AlpacaCredentials,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
    page_limit: u32,
    feed: Option<String>,
}

impl AlpacaProvider {
    pub fn new(
        credentials: AlpacaCredentials,
        settings: &ProviderConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| FetchError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            credentials,
            circuit_breaker,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            page_limit: settings.page_limit,
            feed: settings.feed.clone(),
        })
    }

    fn bars_url(&self, symbol: &str) -> String {
        format!("{}/v2/stocks/{symbol}/bars", self.base_url)
    }

    /// Request one page of bars.
    fn request_page(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        page_token: Option<&str>,
    ) -> Result<BarsPage, FetchError> {
        let mut query: Vec<(&str, String)> = vec![
            ("timeframe", "1Day".to_string()),
            ("start", start.format("%Y-%m-%d").to_string()),
            ("end", end.format("%Y-%m-%d").to_string()),
            ("limit", self.page_limit.to_string()),
        ];
        if let Some(feed) = &self.feed {
            query.push(("feed", feed.clone()));
        }
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }

        let resp = self
            .client
            .get(self.bars_url(symbol))
            .header("APCA-API-KEY-ID", &self.credentials.key_id)
            .header("APCA-API-SECRET-KEY", &self.credentials.secret_key)
            .query(&query)
            .send()
            .map_err(|e| {
                self.circuit_breaker.record_failure();
                FetchError::Unavailable(format!("request for {symbol} failed: {e}"))
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(FetchError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(FetchError::Unavailable(format!(
                "credentials rejected (HTTP {status})"
            )));
        }
        if status.is_server_error() {
            self.circuit_breaker.record_failure();
        }
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!("HTTP {status} for {symbol}")));
        }

        resp.json::<BarsPage>().map_err(|e| {
            FetchError::Unavailable(format!("unexpected response format for {symbol}: {e}"))
        })
    }
}

/// Convert one page of provider bars, dropping entries with no prices at all.
fn convert_bars(raw: Vec<AlpacaBar>) -> Vec<Bar> {
    raw.into_iter()
        .filter(|b| b.o.is_some() || b.h.is_some() || b.l.is_some() || b.c.is_some())
        .map(|b| Bar {
            date: b.t.date_naive(),
            open: b.o.unwrap_or(f64::NAN),
            high: b.h.unwrap_or(f64::NAN),
            low: b.l.unwrap_or(f64::NAN),
            close: b.c.unwrap_or(f64::NAN),
            volume: b.v.map(|v| v.max(0.0) as u64).unwrap_or(0),
        })
        .collect()
}

impl BarProvider for AlpacaProvider {
    fn name(&self) -> &str {
        "alpaca"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::Unavailable(format!(
                "circuit breaker open ({}s remaining)",
                self.circuit_breaker.remaining_cooldown().as_secs()
            )));
        }

        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        for page_no in 0..MAX_PAGES {
            let page = self.request_page(symbol, start, end, page_token.as_deref())?;
            let page_bars = convert_bars(page.bars.unwrap_or_default());
            debug!(symbol, page = page_no, bars = page_bars.len(), "fetched page");
            bars.extend(page_bars);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => {
                    self.circuit_breaker.record_success();
                    return Ok(bars);
                }
            }
        }

        warn!(symbol, pages = MAX_PAGES, "page limit reached, returning partial range");
        self.circuit_breaker.record_success();
        Ok(bars)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
