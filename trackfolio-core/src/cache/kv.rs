//! Key-value backends for cached scalars.
//!
//! The engine only needs `GET`, `SET`, prefix listing and `DEL`; no TTLs and
//! no transactions.

use crate::error::CacheError;
use redis::Commands;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    /// Delete `keys`, returning how many existed.
    fn delete(&self, keys: &[String]) -> Result<usize, CacheError>;
}

/// Process-local map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut entries = self.lock();
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }
}

/// Redis over a single synchronous connection.
pub struct RedisStore {
    conn: Mutex<redis::Connection>,
}

impl RedisStore {
    pub fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, redis::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KvStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.conn().get::<_, Option<String>>(key)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.conn().set::<_, _, ()>(key, value)?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.conn().keys::<_, Vec<String>>(format!("{prefix}*"))?)
    }

    fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.conn().del::<_, usize>(keys)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("cov:A:B").unwrap(), None);

        store.set("cov:A:B", "0.5").unwrap();
        store.set("cov:A:C", "0.25").unwrap();
        store.set("other", "x").unwrap();
        assert_eq!(store.get("cov:A:B").unwrap().as_deref(), Some("0.5"));

        let mut keys = store.keys_with_prefix("cov:").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cov:A:B".to_string(), "cov:A:C".to_string()]);

        let removed = store
            .delete(&["cov:A:B".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
    }
}
