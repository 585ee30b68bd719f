//! Incremental synchronization of stored series with the upstream provider

pub mod clock;
pub mod coordinator;

pub use clock::{Clock, FixedClock, SystemClock};
pub use coordinator::{SymbolOutcome, SyncCoordinator, SyncReport, SyncSettings};
