//! Cursor controller: typed reads and writes of the persisted cursor.
//!
//! Sits between the engine and the [`CursorStore`], doing canonical
//! (de)serialization at the edge and resolving the initial value on first
//! read. Mutation ordering is the engine's concern: `next` is last-writer-
//! wins at the store level, and coordinated callers serialize through the
//! cursor lock before writing.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::codec;
use crate::driver::CursorDriver;
use crate::error::RatchetError;
use crate::store::CursorStore;

pub struct CursorController<T> {
    store: Arc<dyn CursorStore>,
    driver: Arc<dyn CursorDriver<T>>,
    key: String,
    name: String,
    initial: Option<T>,
}

impl<T> CursorController<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<dyn CursorStore>,
        driver: Arc<dyn CursorDriver<T>>,
        key: String,
        name: String,
        initial: Option<T>,
    ) -> Self {
        Self {
            store,
            driver,
            key,
            name,
            initial,
        }
    }

    /// The stored cursor value, or the resolved initial when the store is
    /// empty.
    ///
    /// Initial resolution order: the driver's `initial()` hook, then the
    /// config-level `initial`. With neither present, an empty store is a
    /// `Misconfiguration`.
    pub async fn current(&self) -> Result<T, RatchetError> {
        if let Some(raw) = self
            .store
            .get(&self.key)
            .await
            .map_err(RatchetError::Store)?
        {
            return codec::decode(&raw);
        }

        if let Some(initial) = self.driver.initial().await {
            return Ok(initial);
        }
        if let Some(initial) = &self.initial {
            return Ok(initial.clone());
        }
        Err(RatchetError::Misconfiguration(format!(
            "indexer {} has no stored cursor and no initial value",
            self.name
        )))
    }

    /// Write `value` unconditionally, or advance by one step when absent.
    pub async fn next(&self, value: Option<T>) -> Result<(), RatchetError> {
        let value = match value {
            Some(value) => value,
            None => self.step(None).await?,
        };
        self.write(&value).await
    }

    /// `step(value)`, reading the current cursor when no value is given.
    pub async fn step(&self, value: Option<T>) -> Result<T, RatchetError> {
        let current = match value {
            Some(value) => value,
            None => self.current().await?,
        };
        Ok(self.driver.step(current).await)
    }

    /// The terminal predicate, evaluated against the current cursor.
    pub async fn latest(&self) -> Result<bool, RatchetError> {
        let current = self.current().await?;
        Ok(self.driver.latest(current).await)
    }

    /// Write an already-computed value. Used by the claim and rollback paths
    /// that hold the cursor lock.
    pub async fn write(&self, value: &T) -> Result<(), RatchetError> {
        let encoded = codec::encode(value)?;
        debug!(name = %self.name, cursor = %encoded, "writing cursor");
        self.store
            .set(&self.key, &encoded)
            .await
            .map_err(RatchetError::Store)
    }

    /// Remove the stored value entirely.
    pub async fn clear(&self) -> Result<(), RatchetError> {
        self.store
            .delete(&self.key)
            .await
            .map_err(RatchetError::Store)
    }
}
