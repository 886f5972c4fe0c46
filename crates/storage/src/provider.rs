//! Pluggable key-value storage. The engine persists sticky assignments
//! through this trait; implementations back it with browser storage, a
//! remote store, or nothing at all.

use dashmap::DashMap;
use shopsplit_core::error::SplitResult;

/// String key-value storage with the surface of browser local storage.
pub trait StorageProvider: Send + Sync {
    fn get(&self, key: &str) -> SplitResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> SplitResult<()>;
    fn remove(&self, key: &str) -> SplitResult<()>;
}

/// In-process storage backed by DashMap. The local-only provider for
/// embedded use and tests.
#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StorageProvider for MemoryStorage {
    fn get(&self, key: &str) -> SplitResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> SplitResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SplitResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Discards all writes and never finds anything. Assignments become
/// session-scoped in-memory decisions.
pub struct NoOpStorage;

impl StorageProvider for NoOpStorage {
    fn get(&self, _key: &str) -> SplitResult<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> SplitResult<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> SplitResult<()> {
        Ok(())
    }
}
