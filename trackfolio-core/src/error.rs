//! Error types shared across the engine.
//!
//! Each component has its own enum; [`EngineError`] is what the
//! caller-facing operations on [`crate::RiskEngine`] return.

use crate::data::provider::FetchError;
use thiserror::Error;

/// Read/write failure on persisted series or watermarks.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid symbol for storage: {0:?}")]
    InvalidSymbol(String),
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Failure of one symbol's sync. Never fatal to a batch.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("still rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("sync cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StatsError {
    #[error("insufficient data: {observations} aligned observations, need at least 2")]
    InsufficientData { observations: usize },

    #[error("return series differ in length ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("portfolio has no holdings")]
    EmptyPortfolio,
}
