use crate::{Durability, Store, StoreResult, validate_key};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Process-lifetime store used when nothing durable is available.
#[derive(Clone, Default)]
pub struct MemStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len();
        f.debug_struct("MemStore").field("entries", &len).finish()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        validate_key(key)?;
        let guard = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        validate_key(key)?;
        let mut guard = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        let mut guard = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(key);
        Ok(())
    }

    fn durability(&self) -> Durability {
        Durability::PageLifetime
    }
}
