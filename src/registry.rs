//! Indexer registry: an explicit `name → indexer` map.
//!
//! Owned by a top-level context constructed once at startup and passed to
//! whatever drives `consume` ticks — never a process global. Indexers are
//! generic in their cursor type, so storage is type-erased and retrieval
//! re-asserts the type.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::indexer::Indexer;

/// Registry of named indexers.
#[derive(Default)]
pub struct IndexerRegistry {
    indexers: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl IndexerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an indexer under its configured name.
    ///
    /// # Panics
    ///
    /// Panics if an indexer is already registered under the same name —
    /// two engines coordinating the same keys is a deployment bug, not a
    /// runtime condition.
    pub fn insert<T>(&self, indexer: Indexer<T>) -> Arc<Indexer<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let name = indexer.name().to_string();
        let indexer = Arc::new(indexer);
        let mut indexers = self.indexers.write().expect("registry lock poisoned");
        if indexers.contains_key(&name) {
            panic!("indexer already registered under name: {}", name);
        }
        indexers.insert(name, indexer.clone());
        indexer
    }

    /// Look up an indexer by name and cursor type.
    ///
    /// Returns `None` when the name is unregistered or registered with a
    /// different cursor type.
    pub fn get<T>(&self, name: &str) -> Option<Arc<Indexer<T>>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let indexers = self.indexers.read().expect("registry lock poisoned");
        indexers
            .get(name)
            .cloned()
            .and_then(|any| any.downcast::<Indexer<T>>().ok())
    }

    /// Remove an indexer by name, returning whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        let mut indexers = self.indexers.write().expect("registry lock poisoned");
        indexers.remove(name).is_some()
    }

    /// Is `name` registered?
    pub fn has(&self, name: &str) -> bool {
        let indexers = self.indexers.read().expect("registry lock poisoned");
        indexers.contains_key(name)
    }

    /// All registered names, in no particular order.
    pub fn names(&self) -> Vec<String> {
        let indexers = self.indexers.read().expect("registry lock poisoned");
        indexers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.indexers.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
