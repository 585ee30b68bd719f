//! Trackfolio Core: bar synchronization and covariance engine for portfolio risk.
//!
//! This crate contains:
//! - Domain types (bars, bar series, holdings, valuation points)
//! - A Parquet-backed bar store with rolling retention and sync watermarks
//! - An Alpaca market-data provider with rate-limit retry and a circuit breaker
//! - A sync coordinator with bounded concurrent fetches
//! - Log-return and covariance statistics
//! - A symmetric-key covariance cache over memory or Redis
//! - The [`RiskEngine`] facade tying these together

pub mod cache;
pub mod cancel;
pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod stats;
pub mod sync;
pub mod valuation;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use engine::{RiskEngine, SymbolStatus};
pub use error::EngineError;
