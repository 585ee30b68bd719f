//! Upstream fetching and local persistence

pub mod alpaca;
pub mod circuit_breaker;
pub mod mock;
pub mod provider;
pub mod retry;
pub mod store;
pub mod watermark;

pub use alpaca::{AlpacaCredentials, AlpacaProvider};
pub use circuit_breaker::CircuitBreaker;
pub use mock::{FetchCall, MockProvider};
pub use provider::{BarProvider, FetchError};
pub use retry::{fetch_with_retry, RetryPolicy};
pub use store::{BarStore, SeriesMeta, SeriesStatus};
pub use watermark::WatermarkStore;
