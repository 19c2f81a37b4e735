//! Indexer configuration and coordinator key naming.

use std::time::Duration;

/// Configuration for a named indexer.
///
/// `name` is the unique indexer identifier and appears in every coordinator
/// key. The three timeouts bound how long state survives a crashed worker:
/// the shadow TTL (`running_timeout`) draws the zombie boundary, the retry
/// queue is dropped wholesale after `retry_timeout` of inactivity, and the
/// live-task list after `concurrency_timeout`.
#[derive(Debug, Clone)]
pub struct IndexerConfig<T> {
    /// Unique indexer identifier; used in every coordinator key.
    pub name: String,
    /// Starting cursor value when the store is empty. A driver-level
    /// `initial()` hook takes precedence. If neither is present, the first
    /// read fails with `Misconfiguration`.
    pub initial: Option<T>,
    /// Global admission cap. When unset, admission is disabled and `consume`
    /// never backpressures.
    pub concurrency: Option<usize>,
    /// Shadow TTL; a live task whose shadow has expired is a zombie.
    pub running_timeout: Duration,
    /// Retry-queue key TTL.
    pub retry_timeout: Duration,
    /// Live-task list TTL. Resolved to `2 * running_timeout` when unset.
    pub concurrency_timeout: Option<Duration>,
    /// Cursor-lock TTL, doubling as the blocking-acquire wait budget.
    /// Critical sections are coordinator reads and writes only, so they
    /// complete well within this.
    pub lock_timeout: Duration,
}

impl<T> IndexerConfig<T> {
    /// Create a config with the default timeouts.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: None,
            concurrency: None,
            running_timeout: Duration::from_secs(60),
            retry_timeout: Duration::from_secs(60),
            concurrency_timeout: None,
            lock_timeout: Duration::from_secs(1),
        }
    }

    /// The live-task list TTL, defaulting to twice the shadow TTL so an
    /// orphaned list outlives every shadow it could still be reaped against.
    pub fn resolved_concurrency_timeout(&self) -> Duration {
        self.concurrency_timeout
            .unwrap_or(self.running_timeout * 2)
    }
}

/// Precomputed coordinator key names for one indexer.
///
/// Layout, for an indexer named `N`:
///
/// | key | holds |
/// |---|---|
/// | `indexer:N` | cursor value (in the cursor store) |
/// | `indexer:N:current` | cursor mutex |
/// | `indexer:N:concurrency` | live-task list |
/// | `indexer:N:concurrency:shadow:<enc>` | per-task shadow marker |
/// | `indexer:N:failed` | retry queue |
/// | `indexer:N:epoch` | rollback epoch counter |
#[derive(Debug, Clone)]
pub struct Keys {
    pub cursor: String,
    pub lock: String,
    pub live: String,
    pub retry: String,
    pub epoch: String,
    shadow_prefix: String,
}

impl Keys {
    pub fn new(name: &str) -> Self {
        Self {
            cursor: format!("indexer:{name}"),
            lock: format!("indexer:{name}:current"),
            live: format!("indexer:{name}:concurrency"),
            retry: format!("indexer:{name}:failed"),
            epoch: format!("indexer:{name}:epoch"),
            shadow_prefix: format!("indexer:{name}:concurrency:shadow:"),
        }
    }

    /// Shadow key for a canonically-encoded start value.
    pub fn shadow(&self, encoded: &str) -> String {
        format!("{}{}", self.shadow_prefix, encoded)
    }
}
