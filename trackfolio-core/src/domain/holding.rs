//! Portfolio holdings and valuation points.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A position in the portfolio: how many shares, bought at what price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub shares: f64,
    #[serde(alias = "buyPrice")]
    pub buy_price: f64,
}

/// Portfolio value on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub cost: f64,
    pub unrealized_profit: f64,
}
