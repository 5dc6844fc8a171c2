//! The keyed storage capability the engine persists through.
//!
//! The engine never talks to a concrete database. Everything it durably
//! writes goes through the [`Store`] trait, so the same ledger logic can
//! target an embedded database, a file-backed store, or the in-memory
//! implementation used by tests and the composition root.

use crate::{error::Result, Error};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A keyed JSON-value store with prefix scans.
///
/// Keys are plain strings; `scan` returns entries in lexicographic key
/// order, which the engine relies on for chain-ordered event reads.
pub trait Store: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Put a value under a key, overwriting any existing entry.
    fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Return all entries whose key starts with `prefix`, in key order.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
}

/// In-memory [`Store`] backed by an ordered map.
///
/// BTreeMap keeps scans deterministic and in key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> Error {
    Error::Storage("store lock poisoned".into())
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
