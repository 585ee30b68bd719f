//! Per-symbol sync watermarks, persisted as a single JSON map.
//!
//! The map is loaded once when the engine starts. A missing file means no
//! symbol has been synced yet; an unreadable or corrupt file is an error
//! because fetch windows cannot be derived safely without it.

use super::store::write_atomic;
use crate::error::StoreError;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

pub struct WatermarkStore {
    path: PathBuf,
    marks: Mutex<BTreeMap<String, NaiveDate>>,
}

impl WatermarkStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let marks = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no watermark file, starting fresh");
                BTreeMap::new()
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        Ok(Self {
            path,
            marks: Mutex::new(marks),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, NaiveDate>> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, symbol: &str) -> Option<NaiveDate> {
        self.lock().get(symbol).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, NaiveDate> {
        self.lock().clone()
    }

    /// Record `date` as the latest synced bar for `symbol` and persist the map.
    ///
    /// The in-memory map only changes if the write succeeds.
    pub fn set(&self, symbol: &str, date: NaiveDate) -> Result<(), StoreError> {
        let mut marks = self.lock();
        let mut next = marks.clone();
        next.insert(symbol.to_string(), date);
        write_atomic(&self.path, &serde_json::to_vec_pretty(&next)?)?;
        *marks = next;
        Ok(())
    }
}
