//! The indexer engine: claim, consume, cleanup, rollback, reset.
//!
//! An [`Indexer`] is a value holding the user hooks, the config, and the two
//! backend capabilities. Construct one through [`IndexerBuilder`]; share it
//! (`Arc`) across however many caller-driven tasks should pump `consume`.
//!
//! # Claim path
//!
//! ```text
//! consume()
//!     │ admission (live count vs cap) ── full ──► Backpressured
//!     │
//!     ├─ retry queue non-empty ──► replay oldest failed start
//!     │                            (terminal predicate deliberately skipped)
//!     └─ else ──► atomic(): under cursor lock
//!                   read start → latest? → ended = step(start)
//!                   → pre-claim write(ended) → read epoch
//!     │
//!     ▼ occupy(start)          (live list + shadow, one round trip)
//!     callback(start, ended, epoch)
//!     ▼ release(start)         (always, success or error)
//! ```
//!
//! The cursor is advanced *before* the callback runs. That keeps the lock
//! region down to a handful of coordinator round trips, so dispatch
//! throughput is decoupled from callback latency; an interval whose
//! callback dies is recovered through the retry queue or the reaper, never
//! by rewinding the cursor.
//!
//! # Failure routing
//!
//! A failed callback consults the epoch: if a rollback happened while it
//! ran, its interval belongs to an abandoned timeline and is dropped rather
//! than retried. Otherwise the start value goes to the retry queue (unless
//! the caller opted out). The callback's error is rethrown in every case.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::codec;
use crate::concurrency::ConcurrencyGauge;
use crate::config::{IndexerConfig, Keys};
use crate::coord::{with_lock, CoordOp, Coordinator};
use crate::cursor::CursorController;
use crate::driver::{CursorDriver, FnDriver};
use crate::epoch::EpochCounter;
use crate::error::RatchetError;
use crate::retry::RetryQueue;
use crate::reaper::ZombieReaper;
use crate::store::{CursorStore, MemoryCursorStore};

/// A claimed interval: `[start, ended)` plus the epoch it was issued under.
///
/// By the time a claim is returned the cursor has already advanced to
/// `ended`; `start` survives only in the live-task list (once occupied) or
/// the retry queue (after a failure).
#[derive(Debug, Clone)]
pub struct Claim<T> {
    pub start: T,
    pub ended: T,
    pub epoch: u64,
}

/// Options for [`Indexer::consume_with`].
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Enqueue the start value for retry when the callback fails (and the
    /// epoch still matches). Defaults to true.
    pub retry: bool,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self { retry: true }
    }
}

/// What a `consume` tick actually did.
///
/// Backpressure and a terminal cursor are normal "no dispatch this tick"
/// outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome<T> {
    /// The callback ran to completion for `[start, ended)`.
    Completed { start: T, ended: T },
    /// The concurrency cap was reached; nothing was dispatched.
    Backpressured,
    /// The terminal predicate was true; nothing was dispatched.
    ReachedLatest,
}

impl<T> ConsumeOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, ConsumeOutcome::Completed { .. })
    }

    pub fn is_backpressured(&self) -> bool {
        matches!(self, ConsumeOutcome::Backpressured)
    }

    pub fn is_reached_latest(&self) -> bool {
        matches!(self, ConsumeOutcome::ReachedLatest)
    }
}

/// Everything that only exists when a shared coordinator is configured.
struct Coordinated {
    coord: Arc<dyn Coordinator>,
    gauge: ConcurrencyGauge,
    retry: RetryQueue,
    reaper: ZombieReaper,
    epoch: EpochCounter,
}

/// Per-name coordination engine for one monotonic cursor.
pub struct Indexer<T> {
    name: String,
    keys: Keys,
    lock_timeout: Duration,
    driver: Arc<dyn CursorDriver<T>>,
    cursor: CursorController<T>,
    coordinated: Option<Coordinated>,
}

impl<T> Indexer<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Start building an indexer with the given name.
    pub fn builder(name: impl Into<String>) -> IndexerBuilder<T> {
        IndexerBuilder::new(name)
    }

    /// The indexer's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn coordinated(&self, op: &str) -> Result<&Coordinated, RatchetError> {
        self.coordinated.as_ref().ok_or_else(|| {
            RatchetError::Misconfiguration(format!(
                "indexer {} has no coordinator, required by {}",
                self.name, op
            ))
        })
    }

    /// The stored cursor value, or the resolved initial.
    pub async fn current(&self) -> Result<T, RatchetError> {
        self.cursor.current().await
    }

    /// Write `value`, or advance by one step when absent.
    ///
    /// Bypasses the cursor lock: single-instance mode only, where the
    /// caller owns mutual exclusion. Clustered callers claim through
    /// [`atomic`](Self::atomic) instead.
    pub async fn next(&self, value: Option<T>) -> Result<(), RatchetError> {
        self.cursor.next(value).await
    }

    /// Apply the user step function without mutating anything.
    pub async fn step(&self, value: Option<T>) -> Result<T, RatchetError> {
        self.cursor.step(value).await
    }

    /// Evaluate the terminal predicate against the current cursor.
    pub async fn latest(&self) -> Result<bool, RatchetError> {
        self.cursor.latest().await
    }

    /// The current rollback epoch.
    pub async fn epoch(&self) -> Result<u64, RatchetError> {
        self.coordinated("epoch")?.epoch.current().await
    }

    /// Is `epoch` still the live epoch?
    pub async fn validate(&self, epoch: u64) -> Result<bool, RatchetError> {
        self.coordinated("validate")?.epoch.validate(epoch).await
    }

    /// Claim the next interval: under the cursor lock, read the cursor,
    /// check the terminal predicate, compute the step, advance the cursor,
    /// and read the epoch.
    ///
    /// Fails with `ReachedLatest` (cursor untouched) at the terminal
    /// boundary and `LockUnavailable` when the lock cannot be acquired
    /// within its budget. Concurrent callers racing this method each
    /// receive a distinct interval.
    pub async fn atomic(&self) -> Result<Claim<T>, RatchetError> {
        let c = self.coordinated("atomic")?;
        with_lock(
            c.coord.as_ref(),
            &self.keys.lock,
            self.lock_timeout,
            || async {
                let start = self.cursor.current().await?;
                if self.driver.latest(start.clone()).await {
                    return Err(RatchetError::ReachedLatest {
                        cursor: codec::encode(&start)?,
                    });
                }
                let ended = self.driver.step(start.clone()).await;
                self.cursor.write(&ended).await?;
                let epoch = c.epoch.current().await?;
                debug!(name = %self.name, epoch, "claimed interval");
                Ok(Claim {
                    start,
                    ended,
                    epoch,
                })
            },
        )
        .await
    }

    /// One dispatch tick: admit, claim (retry lane first), occupy, run the
    /// callback, release.
    ///
    /// Replayed failed starts deliberately skip the terminal predicate — a
    /// failed interval past the boundary is still retried. Failure routing
    /// is epoch-matched; see the module docs.
    pub async fn consume<F, Fut>(&self, callback: F) -> Result<ConsumeOutcome<T>, RatchetError>
    where
        F: FnOnce(T, T, u64) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        self.consume_with(ConsumeOptions::default(), callback).await
    }

    /// [`consume`](Self::consume) with explicit options.
    pub async fn consume_with<F, Fut>(
        &self,
        options: ConsumeOptions,
        callback: F,
    ) -> Result<ConsumeOutcome<T>, RatchetError>
    where
        F: FnOnce(T, T, u64) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let c = self.coordinated("consume")?;

        if !c.gauge.admitted().await? {
            return Ok(ConsumeOutcome::Backpressured);
        }

        let claim = match c.retry.failed().await? {
            Some(encoded) => {
                debug!(name = %self.name, start = %encoded, "replaying failed interval");
                let start: T = codec::decode(&encoded)?;
                let ended = self.driver.step(start.clone()).await;
                let epoch = c.epoch.current().await?;
                Claim {
                    start,
                    ended,
                    epoch,
                }
            }
            None => {
                if self.cursor.latest().await? {
                    return Ok(ConsumeOutcome::ReachedLatest);
                }
                match self.atomic().await {
                    Ok(claim) => claim,
                    Err(e) if e.is_reached_latest() => {
                        return Ok(ConsumeOutcome::ReachedLatest);
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let encoded = codec::encode(&claim.start)?;
        c.gauge.occupy(&encoded).await?;

        match callback(claim.start.clone(), claim.ended.clone(), claim.epoch).await {
            Ok(()) => {
                c.gauge.release(&encoded).await;
                Ok(ConsumeOutcome::Completed {
                    start: claim.start,
                    ended: claim.ended,
                })
            }
            Err(err) => {
                self.route_failure(c, &encoded, claim.epoch, options.retry, &err)
                    .await?;
                Err(RatchetError::Callback(err))
            }
        }
    }

    /// Post-callback-failure bookkeeping. Always releases; only propagates
    /// an error when the epoch itself cannot be read, and logs the callback
    /// error first so it stays visible.
    async fn route_failure(
        &self,
        c: &Coordinated,
        encoded: &str,
        claimed_epoch: u64,
        retry: bool,
        callback_err: &anyhow::Error,
    ) -> Result<(), RatchetError> {
        let current_epoch = match c.epoch.current().await {
            Ok(epoch) => epoch,
            Err(e) => {
                // The epoch read failure is what propagates; the callback
                // error must not vanish with it.
                error!(
                    name = %self.name,
                    start = %encoded,
                    error = %callback_err,
                    "callback failed and the epoch could not be read afterwards"
                );
                c.gauge.release(encoded).await;
                return Err(e);
            }
        };

        if current_epoch != claimed_epoch {
            warn!(
                name = %self.name,
                start = %encoded,
                claimed_epoch,
                current_epoch,
                "epoch changed during callback, dropping interval instead of retrying"
            );
        } else if retry {
            if let Err(e) = c.retry.fail(encoded).await {
                // Rethrowing the callback error matters more than this
                // bookkeeping failure; the interval is lost to retry.
                error!(name = %self.name, start = %encoded, error = %e, "failed to enqueue retry");
            }
        }

        c.gauge.release(encoded).await;
        Ok(())
    }

    /// Migrate zombies (live-task entries whose shadow expired) to the
    /// retry queue. Drive this from an external timer.
    pub async fn cleanup(&self) -> Result<(), RatchetError> {
        self.coordinated("cleanup")?.reaper.cleanup().await
    }

    /// Roll the cursor back to `target`.
    ///
    /// Under the cursor lock: runs the `on_rollback` hook (an error aborts
    /// with nothing mutated), writes `target`, wipes the live-task list,
    /// every shadow, and the retry queue, and increments the epoch so
    /// in-flight callbacks from the abandoned timeline invalidate
    /// themselves.
    pub async fn rollback(&self, target: T) -> Result<(), RatchetError> {
        let c = self.coordinated("rollback")?;
        with_lock(
            c.coord.as_ref(),
            &self.keys.lock,
            self.lock_timeout,
            || async {
                let from = self.cursor.current().await?;
                self.driver
                    .on_rollback(from.clone(), target.clone())
                    .await
                    .map_err(RatchetError::Callback)?;

                self.cursor.write(&target).await?;

                let live = c
                    .coord
                    .list_range(&self.keys.live)
                    .await
                    .map_err(RatchetError::Coordinator)?;
                let mut ops: Vec<CoordOp> = live
                    .into_iter()
                    .map(|encoded| CoordOp::Del {
                        key: self.keys.shadow(&encoded),
                    })
                    .collect();
                ops.push(CoordOp::Del {
                    key: self.keys.live.clone(),
                });
                ops.push(CoordOp::Del {
                    key: self.keys.retry.clone(),
                });
                c.coord.batch(ops).await.map_err(RatchetError::Coordinator)?;

                let epoch = c.epoch.increment().await?;
                warn!(name = %self.name, epoch, "rolled back cursor, in-flight work invalidated");
                Ok(())
            },
        )
        .await
    }

    /// Administrative escape hatch: delete the cursor, lock key, live-task
    /// list, retry queue, and epoch counter.
    ///
    /// Shadow keys are left to expire by TTL. Callers must ensure no
    /// instance is concurrently running against this indexer.
    pub async fn reset(&self) -> Result<(), RatchetError> {
        self.cursor.clear().await?;
        if let Some(c) = &self.coordinated {
            c.coord
                .batch(vec![
                    CoordOp::Del {
                        key: self.keys.lock.clone(),
                    },
                    CoordOp::Del {
                        key: self.keys.live.clone(),
                    },
                    CoordOp::Del {
                        key: self.keys.retry.clone(),
                    },
                    CoordOp::Del {
                        key: self.keys.epoch.clone(),
                    },
                ])
                .await
                .map_err(RatchetError::Coordinator)?;
        }
        Ok(())
    }
}

type BoxedStep<T> = Box<dyn Fn(T) -> T + Send + Sync>;
type BoxedLatest<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type BoxedInitial<T> = Box<dyn Fn() -> T + Send + Sync>;
type BoxedRollback<T> = Box<dyn Fn(&T, &T) -> anyhow::Result<()> + Send + Sync>;

/// Builder for [`Indexer`].
///
/// Hooks come either from a full [`CursorDriver`] implementation
/// ([`driver`](Self::driver)) or from closures; a step function is required
/// one way or the other. The store defaults to the in-process
/// [`MemoryCursorStore`]; the coordinator is optional, and without one the
/// indexer runs in single-instance mode (cursor ops only).
pub struct IndexerBuilder<T> {
    config: IndexerConfig<T>,
    driver: Option<Arc<dyn CursorDriver<T>>>,
    step: Option<BoxedStep<T>>,
    latest: Option<BoxedLatest<T>>,
    initial_fn: Option<BoxedInitial<T>>,
    on_rollback: Option<BoxedRollback<T>>,
    store: Option<Arc<dyn CursorStore>>,
    coordinator: Option<Arc<dyn Coordinator>>,
}

impl<T> IndexerBuilder<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: IndexerConfig::new(name),
            driver: None,
            step: None,
            latest: None,
            initial_fn: None,
            on_rollback: None,
            store: None,
            coordinator: None,
        }
    }

    /// Starting cursor value when the store is empty.
    pub fn initial(mut self, initial: T) -> Self {
        self.config.initial = Some(initial);
        self
    }

    /// Global admission cap.
    pub fn concurrency(mut self, cap: usize) -> Self {
        self.config.concurrency = Some(cap);
        self
    }

    /// Shadow TTL (the zombie boundary).
    pub fn running_timeout(mut self, timeout: Duration) -> Self {
        self.config.running_timeout = timeout;
        self
    }

    /// Retry-queue key TTL.
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.config.retry_timeout = timeout;
        self
    }

    /// Live-task list TTL (defaults to twice the shadow TTL).
    pub fn concurrency_timeout(mut self, timeout: Duration) -> Self {
        self.config.concurrency_timeout = Some(timeout);
        self
    }

    /// Cursor-lock TTL and acquire budget.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Use a full [`CursorDriver`] implementation. Takes precedence over
    /// the closure hooks.
    pub fn driver(mut self, driver: impl CursorDriver<T> + 'static) -> Self {
        self.driver = Some(Arc::new(driver));
        self
    }

    /// The step function, as a closure.
    pub fn step_fn(mut self, step: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.step = Some(Box::new(step));
        self
    }

    /// The terminal predicate, as a closure.
    pub fn latest_fn(mut self, latest: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.latest = Some(Box::new(latest));
        self
    }

    /// The initial-value resolver, as a closure. Overrides
    /// [`initial`](Self::initial).
    pub fn initial_fn(mut self, initial: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.initial_fn = Some(Box::new(initial));
        self
    }

    /// The rollback hook, as a closure.
    pub fn on_rollback_fn(
        mut self,
        on_rollback: impl Fn(&T, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_rollback = Some(Box::new(on_rollback));
        self
    }

    /// Cursor store. Defaults to [`MemoryCursorStore`].
    pub fn store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shared coordinator. Without one, coordinated operations fail with
    /// `Misconfiguration`.
    pub fn coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn build(self) -> Result<Indexer<T>, RatchetError> {
        if self.config.name.is_empty() {
            return Err(RatchetError::Misconfiguration(
                "indexer name must not be empty".to_string(),
            ));
        }

        let driver: Arc<dyn CursorDriver<T>> = match (self.driver, self.step) {
            (Some(driver), _) => driver,
            (None, Some(step)) => {
                let mut fn_driver = FnDriver::new(step);
                if let Some(latest) = self.latest {
                    fn_driver = fn_driver.with_latest(latest);
                }
                if let Some(initial_fn) = self.initial_fn {
                    fn_driver = fn_driver.with_initial(initial_fn);
                }
                if let Some(on_rollback) = self.on_rollback {
                    fn_driver = fn_driver.with_on_rollback(on_rollback);
                }
                Arc::new(fn_driver)
            }
            (None, None) => {
                return Err(RatchetError::Misconfiguration(format!(
                    "indexer {} has no step function",
                    self.config.name
                )));
            }
        };

        let name = self.config.name.clone();
        let keys = Keys::new(&name);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCursorStore::new()));

        let cursor = CursorController::new(
            store,
            driver.clone(),
            keys.cursor.clone(),
            name.clone(),
            self.config.initial.clone(),
        );

        let coordinated = self.coordinator.map(|coord| Coordinated {
            gauge: ConcurrencyGauge::new(
                coord.clone(),
                keys.clone(),
                name.clone(),
                self.config.concurrency,
                self.config.running_timeout,
                self.config.resolved_concurrency_timeout(),
            ),
            retry: RetryQueue::new(coord.clone(), keys.retry.clone(), self.config.retry_timeout),
            reaper: ZombieReaper::new(
                coord.clone(),
                keys.clone(),
                name.clone(),
                self.config.retry_timeout,
            ),
            epoch: EpochCounter::new(coord.clone(), keys.epoch.clone()),
            coord,
        });

        Ok(Indexer {
            name,
            keys,
            lock_timeout: self.config.lock_timeout,
            driver,
            cursor,
            coordinated,
        })
    }
}
