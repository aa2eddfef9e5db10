//! `MemoryStore` - in-process storage adapter for tests and embedding.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::{LedgerResult, StorageAdapter};

/// Storage adapter that keeps serialized collections in a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RefCell<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored value for a key.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    /// Overwrite a raw value, bypassing the ledger.
    pub fn put_raw(&self, key: &str, value: impl Into<String>) {
        self.values.borrow_mut().insert(key.to_string(), value.into());
    }
}

impl StorageAdapter for MemoryStore {
    fn load(&self, key: &str) -> LedgerResult<Option<String>> {
        Ok(self.raw(key))
    }

    fn save(&self, key: &str, value: &str) -> LedgerResult<()> {
        self.put_raw(key, value);
        Ok(())
    }
}
