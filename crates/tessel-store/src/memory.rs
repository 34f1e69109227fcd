//! In-memory store.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::LocalStore;
use crate::errors::Result;

/// A [`LocalStore`] backed by a `HashMap`. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _ = self
            .entries
            .lock()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().contains_key(key))
    }
}
