//! Return and covariance statistics over bar series.

use crate::domain::Bar;
use crate::error::StatsError;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Log returns `ln(close[i] / close[i-1])` over adjacent bars.
///
/// Pairs where either close is missing or non-positive are skipped, not
/// zero-filled, so the output has at most `bars.len() - 1` entries.
pub fn log_returns<'a>(bars: impl IntoIterator<Item = &'a Bar>) -> Vec<f64> {
    dated_log_returns(bars).into_iter().map(|(_, r)| r).collect()
}

/// Like [`log_returns`], with each return tagged by the date of its later bar.
pub fn dated_log_returns<'a>(bars: impl IntoIterator<Item = &'a Bar>) -> Vec<(NaiveDate, f64)> {
    let mut out = Vec::new();
    let mut prev: Option<&Bar> = None;
    for bar in bars {
        if let Some(p) = prev {
            if p.has_usable_close() && bar.has_usable_close() {
                out.push((bar.date, (bar.close / p.close).ln()));
            }
        }
        prev = Some(bar);
    }
    out
}

/// Intersect two dated return series on date, preserving `a`'s order.
pub fn align_returns(a: &[(NaiveDate, f64)], b: &[(NaiveDate, f64)]) -> (Vec<f64>, Vec<f64>) {
    let lookup: HashMap<NaiveDate, f64> = b.iter().copied().collect();
    a.iter()
        .filter_map(|(date, ra)| lookup.get(date).map(|rb| (*ra, *rb)))
        .unzip()
}

pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Sample covariance `Σ(a-ā)(b-b̄) / (N-1)` of two equal-length series.
pub fn covariance(a: &[f64], b: &[f64]) -> Result<f64, StatsError> {
    if a.len() != b.len() {
        return Err(StatsError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let n = a.len();
    let (Some(mean_a), Some(mean_b)) = (mean(a), mean(b)) else {
        return Err(StatsError::InsufficientData { observations: n });
    };
    if n < 2 {
        return Err(StatsError::InsufficientData { observations: n });
    }

    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum();
    Ok(sum / (n - 1) as f64)
}

/// Sample variance, i.e. the covariance of a series with itself.
pub fn variance(a: &[f64]) -> Result<f64, StatsError> {
    covariance(a, a)
}

/// Covariance of two bar series' log returns, aligned on date.
pub fn series_covariance<'a, 'b>(
    a: impl IntoIterator<Item = &'a Bar>,
    b: impl IntoIterator<Item = &'b Bar>,
) -> Result<f64, StatsError> {
    let (ra, rb) = align_returns(&dated_log_returns(a), &dated_log_returns(b));
    covariance(&ra, &rb)
}
