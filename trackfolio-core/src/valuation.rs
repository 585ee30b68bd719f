//! Historical portfolio valuation.

use crate::domain::{Bar, Holding, ValuationPoint};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Round to cents.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Value the portfolio on every date of the first holding's series.
///
/// A holding without a bar (or with a missing close) on a reference date
/// contributes zero value for that date but still contributes its cost.
pub fn value_series(
    holdings: &[Holding],
    series: &HashMap<String, BTreeMap<NaiveDate, Bar>>,
) -> Vec<ValuationPoint> {
    let Some(reference) = holdings.first().and_then(|h| series.get(&h.symbol)) else {
        return Vec::new();
    };

    reference
        .keys()
        .map(|&date| {
            let (value, cost) = holdings.iter().fold((0.0, 0.0), |(value, cost), h| {
                let price = series
                    .get(&h.symbol)
                    .and_then(|bars| bars.get(&date))
                    .map(|bar| bar.close)
                    .filter(|c| c.is_finite())
                    .unwrap_or(0.0);
                (value + h.shares * price, cost + h.shares * h.buy_price)
            });
            ValuationPoint {
                date,
                value: round2(value),
                cost: round2(cost),
                unrealized_profit: round2(value - cost),
            }
        })
        .collect()
}
