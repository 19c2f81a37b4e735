//! Shared-coordinator capability.
//!
//! Everything the engine asks of its coordinator is captured by the
//! [`Coordinator`] trait: a TTL mutex, an atomic counter, list operations,
//! TTL string keys, and a pipelined multi-op batch. Canonically this is
//! Redis ([`RedisCoordinator`](crate::RedisCoordinator)); the in-process
//! [`MemoryCoordinator`](crate::MemoryCoordinator) provides the same
//! semantics for single-process deployments and tests.
//!
//! ratchet owns the capability surface only. Implementations decide wire
//! details; the engine never sees them beyond an `anyhow` transport error
//! wrapped into `RatchetError::Coordinator` at the boundary.

pub mod memory;
pub mod redis;

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::error::RatchetError;

/// One operation inside a pipelined batch.
///
/// Batches exist so that multi-key mutations (occupy, release, fail, zombie
/// migration) cost one coordinator round trip and are applied together.
#[derive(Debug, Clone)]
pub enum CoordOp {
    /// Append a value to the tail of a list.
    Push { key: String, value: String },
    /// Remove at most one exact-match occurrence from a list.
    ///
    /// The count is fixed at one: each start value appears at most once on
    /// the live-task list, and removing more would break that invariant's
    /// recovery path.
    Remove { key: String, value: String },
    /// Write a string key with a TTL.
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
    /// Refresh the TTL on an existing key. No-op when the key is absent.
    Expire { key: String, ttl: Duration },
    /// Delete a key of any type.
    Del { key: String },
}

/// Capability set the engine consumes from the shared coordinator.
///
/// List values and string keys carry canonically-encoded cursor values; the
/// coordinator treats them as opaque strings. Counters are 64-bit and an
/// absent counter reads as zero.
#[async_trait::async_trait]
pub trait Coordinator: Send + Sync {
    /// Try to acquire the mutex `key` with the given TTL.
    ///
    /// Returns a fencing token on success, `None` when the lock is held.
    /// The TTL self-releases a crashed holder.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<Option<String>>;

    /// Release a held mutex. Must be a no-op when `token` no longer matches,
    /// so an expired holder cannot release its successor's lock.
    async fn release_lock(&self, key: &str, token: &str) -> Result<()>;

    /// Atomically increment a counter, returning the new value.
    async fn incr(&self, key: &str) -> Result<u64>;

    /// Read a counter; absent reads as zero.
    async fn counter(&self, key: &str) -> Result<u64>;

    /// Append to the tail of a list.
    async fn list_push(&self, key: &str, value: &str) -> Result<()>;

    /// Pop from the head of a list.
    async fn list_pop(&self, key: &str) -> Result<Option<String>>;

    /// Remove at most one exact-match occurrence from a list, returning how
    /// many were removed.
    async fn list_remove(&self, key: &str, value: &str) -> Result<usize>;

    /// Read a whole list, head first.
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;

    /// Length of a list; absent reads as zero.
    async fn list_len(&self, key: &str) -> Result<usize>;

    /// Write a string key with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Does the key currently exist (and is unexpired)?
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete a key of any type.
    async fn del(&self, key: &str) -> Result<()>;

    /// Refresh the TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Apply a batch of operations in one round trip.
    async fn batch(&self, ops: Vec<CoordOp>) -> Result<()>;
}

/// How often a blocked acquirer re-polls the lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run `body` under the mutex `key`, releasing it on every exit path.
///
/// Acquisition blocks, re-polling until `budget` is exhausted, then fails
/// with `LockUnavailable`. The lock TTL equals the budget: a holder that
/// dies without releasing stops blocking the cluster after one budget.
/// Release failures are logged and swallowed — the TTL is the backstop, and
/// the body's result must not be masked by lock bookkeeping.
pub(crate) async fn with_lock<F, Fut, R>(
    coord: &dyn Coordinator,
    key: &str,
    budget: Duration,
    body: F,
) -> Result<R, RatchetError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, RatchetError>>,
{
    let started = tokio::time::Instant::now();
    let token = loop {
        match coord
            .acquire_lock(key, budget)
            .await
            .map_err(RatchetError::Coordinator)?
        {
            Some(token) => break token,
            None => {
                if started.elapsed() >= budget {
                    return Err(RatchetError::LockUnavailable {
                        key: key.to_string(),
                        waited: started.elapsed(),
                    });
                }
                tokio::time::sleep(LOCK_POLL_INTERVAL).await;
            }
        }
    };

    let result = body().await;

    if let Err(e) = coord.release_lock(key, &token).await {
        warn!(key = %key, error = %e, "failed to release lock, TTL will reclaim it");
    }

    result
}
