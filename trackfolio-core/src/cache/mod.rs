//! Covariance cache and its key-value backends

pub mod covariance;
pub mod kv;

pub use covariance::{canonical_pair, pair_key, parse_pair_key, CovarianceCache, KEY_PREFIX};
pub use kv::{KvStore, MemoryStore, RedisStore};
