//! Per-symbol bar store backed by Parquet.
//!
//! Layout: `{root}/symbol={SYMBOL}/bars.parquet` plus a `meta.json` sidecar.
//!
//! - `load` never fails: unknown symbols and unreadable files yield an empty series
//! - `merge` upserts by date, trims to the retention window, and persists
//! - Writes go to a `.tmp` file, are fsynced, then renamed over the old file
//! - Corrupt files are quarantined (`bars.parquet.quarantined`) on load

use crate::domain::{Bar, BarSeries};
use crate::error::StoreError;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

const COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

/// Metadata sidecar for a stored series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub bar_count: usize,
    pub data_hash: String,
    pub written_at: NaiveDateTime,
}

/// Stored-series summary for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStatus {
    pub symbol: String,
    pub stored: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub bar_count: Option<usize>,
}

/// Symbols become directory names, so only a conservative character set is accepted.
pub fn is_storable_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= 32
        && !symbol.contains("..")
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

pub struct BarStore {
    root: PathBuf,
    retention: usize,
}

impl BarStore {
    pub fn new(root: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("symbol={symbol}"))
    }

    fn bars_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("bars.parquet")
    }

    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("meta.json")
    }

    /// Load the stored series for `symbol`, oldest first.
    pub fn load(&self, symbol: &str) -> BarSeries {
        if !is_storable_symbol(symbol) {
            warn!(symbol, "refusing to load unstorable symbol");
            return BarSeries::empty(symbol);
        }

        let path = self.bars_path(symbol);
        if !path.exists() {
            debug!(symbol, "no stored series");
            return BarSeries::empty(symbol);
        }

        match read_bars(&path) {
            Ok(bars) => BarSeries::from_bars(symbol, bars),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(
                    symbol,
                    path = %path.display(),
                    error = %e,
                    "quarantining unreadable series file"
                );
                if let Err(rename_err) = fs::rename(&path, &quarantine) {
                    warn!(symbol, error = %rename_err, "quarantine rename failed");
                }
                BarSeries::empty(symbol)
            }
        }
    }

    /// Merge `bars` into the stored series and persist the trimmed result.
    pub fn merge(&self, symbol: &str, bars: Vec<Bar>) -> Result<BarSeries, StoreError> {
        if !is_storable_symbol(symbol) {
            return Err(StoreError::InvalidSymbol(symbol.to_string()));
        }

        let mut series = self.load(symbol);
        let evicted = series.merge(bars, self.retention);
        if evicted > 0 {
            debug!(symbol, evicted, "trimmed series to retention window");
        }
        if series.is_empty() {
            return Ok(series);
        }

        self.write(&series)?;
        Ok(series)
    }

    fn write(&self, series: &BarSeries) -> Result<(), StoreError> {
        let symbol = series.symbol();
        let dir = self.symbol_dir(symbol);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let mut df = series_to_dataframe(series)?;
        let path = self.bars_path(symbol);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;
        replace(&tmp_path, &path)?;

        let bars = series.to_vec();
        let (Some(start_date), Some(end_date)) = (series.first_date(), series.last_date()) else {
            return Ok(());
        };
        let meta = SeriesMeta {
            symbol: symbol.to_string(),
            start_date,
            end_date,
            bar_count: bars.len(),
            data_hash: blake3::hash(&serde_json::to_vec(&bars)?)
                .to_hex()
                .to_string(),
            written_at: chrono::Local::now().naive_local(),
        };
        write_atomic(&self.meta_path(symbol), &serde_json::to_vec_pretty(&meta)?)
    }

    /// Read the metadata sidecar, if present and parseable.
    pub fn meta(&self, symbol: &str) -> Option<SeriesMeta> {
        if !is_storable_symbol(symbol) {
            return None;
        }
        let content = fs::read_to_string(self.meta_path(symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn status(&self, symbols: &[String]) -> Vec<SeriesStatus> {
        symbols
            .iter()
            .map(|sym| {
                let meta = self.meta(sym);
                SeriesStatus {
                    symbol: sym.clone(),
                    stored: meta.is_some(),
                    start_date: meta.as_ref().map(|m| m.start_date),
                    end_date: meta.as_ref().map(|m| m.end_date),
                    bar_count: meta.as_ref().map(|m| m.bar_count),
                }
            })
            .collect()
    }
}

/// Write `bytes` to `path` via a fsynced temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| StoreError::io(&tmp_path, e))?;
    replace(&tmp_path, path)
}

fn replace(tmp_path: &Path, path: &Path) -> Result<(), StoreError> {
    fs::rename(tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        StoreError::io(path, e)
    })
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn series_to_dataframe(series: &BarSeries) -> Result<DataFrame, StoreError> {
    let dates: Vec<i32> = series
        .iter()
        .map(|b| b.date.num_days_from_ce() - UNIX_EPOCH_CE_DAYS)
        .collect();
    let opens: Vec<f64> = series.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = series.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = series.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = series.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = series.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| StoreError::Parquet(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let mut file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    ParquetWriter::new(&mut file)
        .finish(df)
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    file.sync_all().map_err(|e| StoreError::io(path, e))
}

fn read_bars(path: &Path) -> Result<Vec<Bar>, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;

    for name in COLUMNS {
        if df.column(name).is_err() {
            return Err(StoreError::Parquet(format!("missing column '{name}'")));
        }
    }
    dataframe_to_bars(&df)
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, StoreError> {
    let col = |name: &str| {
        df.column(name)
            .map_err(|e| StoreError::Parquet(format!("column {name}: {e}")))
    };
    let typed = |name: &str, e: PolarsError| StoreError::Parquet(format!("{name} column type: {e}"));

    let date_ca = col("date")?.date().map_err(|e| typed("date", e))?;
    let open_ca = col("open")?.f64().map_err(|e| typed("open", e))?;
    let high_ca = col("high")?.f64().map_err(|e| typed("high", e))?;
    let low_ca = col("low")?.f64().map_err(|e| typed("low", e))?;
    let close_ca = col("close")?.f64().map_err(|e| typed("close", e))?;
    let vol_ca = col("volume")?.u64().map_err(|e| typed("volume", e))?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let days = date_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null date at row {i}")))?;
        let date = NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_CE_DAYS)
            .ok_or_else(|| StoreError::Parquet(format!("date out of range at row {i}")))?;

        bars.push(Bar {
            date,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
        });
    }
    Ok(bars)
}
