//! Rollback epoch counter.
//!
//! Every rollback increments the indexer's epoch. A claim carries the epoch
//! it was issued under, and a worker whose callback fails (or finishes late)
//! compares epochs to decide whether its result still means anything. The
//! engine never cancels an in-flight callback; the epoch converts the
//! pre-rollback dispatch window into a soft-abort where stale results are
//! dropped instead of retried.

use std::sync::Arc;

use crate::coord::Coordinator;
use crate::error::RatchetError;

pub struct EpochCounter {
    coord: Arc<dyn Coordinator>,
    key: String,
}

impl EpochCounter {
    pub fn new(coord: Arc<dyn Coordinator>, key: String) -> Self {
        Self { coord, key }
    }

    /// The current epoch. An indexer that has never rolled back reads zero.
    pub async fn current(&self) -> Result<u64, RatchetError> {
        self.coord
            .counter(&self.key)
            .await
            .map_err(RatchetError::Coordinator)
    }

    /// Is `epoch` still the live epoch? Workers holding a pre-rollback
    /// epoch get `false` and should discard their results.
    pub async fn validate(&self, epoch: u64) -> Result<bool, RatchetError> {
        Ok(self.current().await? == epoch)
    }

    /// Advance the epoch by exactly one, returning the new value. Called
    /// only from the rollback path, under the cursor lock.
    pub async fn increment(&self) -> Result<u64, RatchetError> {
        self.coord
            .incr(&self.key)
            .await
            .map_err(RatchetError::Coordinator)
    }
}
