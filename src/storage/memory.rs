use std::collections::HashMap;
use std::sync::Mutex;

use super::KeyValueStore;
use crate::errors::{CoreError, Result};

/// Purely in-memory key-value store, used in tests and as the degraded
/// fallback when disk storage is unavailable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .lock()
            .map_err(|_| CoreError::Storage("memory store poisoned".into()))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| CoreError::Storage("memory store poisoned".into()))?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| CoreError::Storage("memory store poisoned".into()))?;
        data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("entries").unwrap().is_none());
        store.set("entries", "[]").unwrap();
        assert_eq!(store.get("entries").unwrap().as_deref(), Some("[]"));
        store.remove("entries").unwrap();
        assert!(store.get("entries").unwrap().is_none());
    }
}
