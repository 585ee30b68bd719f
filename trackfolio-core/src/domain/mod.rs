//! Domain types for Trackfolio

pub mod bar;
pub mod holding;

pub use bar::{Bar, BarSeries};
pub use holding::{Holding, ValuationPoint};
