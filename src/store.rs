//! Cursor store capability.
//!
//! The store persists the current cursor value for each indexer name. The
//! engine only needs get/set/delete over canonically-encoded values; what
//! sits behind that (a database row, a file, a map) is the caller's choice.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

/// Durable read/write of encoded cursor values, keyed by the `indexer:N`
/// key prefix shared by all indexers.
///
/// Writes are last-writer-wins; the engine serializes cursor mutation
/// through the coordinator lock, not through the store.
#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    /// Read the stored value, or `None` if the indexer has never advanced.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write the value unconditionally.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value entirely, returning the indexer to its initial state.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process cursor store backed by a HashMap.
///
/// This is the default store. Contents are lost on restart: an indexer
/// backed by it re-resolves its initial value after the process comes back,
/// which is acceptable for cursors that are cheap to replay and wrong for
/// ones that are not. Supply a persistent [`CursorStore`] in the latter case.
#[derive(Default)]
pub struct MemoryCursorStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CursorStore for MemoryCursorStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {}", e))?;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {}", e))?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {}", e))?;
        data.remove(key);
        Ok(())
    }
}
