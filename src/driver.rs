//! User hooks for a cursor domain.
//!
//! An indexer is generic over its cursor type `T` and owns its hooks as a
//! value — there is no inheritance and no runtime metadata. Implement
//! [`CursorDriver`] for full control, or build one from plain closures with
//! [`FnDriver`] and the builder sugar on
//! [`IndexerBuilder`](crate::IndexerBuilder).

use anyhow::Result;

/// The per-domain hooks an indexer calls into.
///
/// Only `step` is required. The remaining hooks have defaults matching an
/// unbounded cursor that starts from the config-level initial value and
/// needs no rollback-side cleanup.
#[async_trait::async_trait]
pub trait CursorDriver<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Advance the cursor by one interval.
    ///
    /// Must be strictly increasing under the caller's ordering, and pure:
    /// deterministic and side-effect-free. The engine calls this inside the
    /// cursor lock's critical section, so violations produce undefined
    /// interval ordering across the cluster.
    async fn step(&self, current: T) -> T;

    /// Terminal predicate: has the cursor reached its stopping point?
    async fn latest(&self, _current: T) -> bool {
        false
    }

    /// Starting cursor value, overriding the config-level `initial`.
    async fn initial(&self) -> Option<T> {
        None
    }

    /// Business-side cleanup before a rollback moves the cursor.
    ///
    /// An error here aborts the rollback: the cursor, queues, and epoch are
    /// left untouched.
    async fn on_rollback(&self, _from: T, _to: T) -> Result<()> {
        Ok(())
    }
}

type StepFn<T> = Box<dyn Fn(T) -> T + Send + Sync>;
type LatestFn<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type InitialFn<T> = Box<dyn Fn() -> T + Send + Sync>;
type RollbackFn<T> = Box<dyn Fn(&T, &T) -> Result<()> + Send + Sync>;

/// A [`CursorDriver`] assembled from closures.
///
/// # Example
///
/// ```ignore
/// let driver = FnDriver::new(|c: u64| c + 1)
///     .with_latest(|c| *c >= 100)
///     .with_initial(|| 0);
/// ```
pub struct FnDriver<T> {
    step: StepFn<T>,
    latest: Option<LatestFn<T>>,
    initial: Option<InitialFn<T>>,
    on_rollback: Option<RollbackFn<T>>,
}

impl<T> FnDriver<T> {
    /// Create a driver from the required step function.
    pub fn new(step: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        Self {
            step: Box::new(step),
            latest: None,
            initial: None,
            on_rollback: None,
        }
    }

    /// Set the terminal predicate.
    pub fn with_latest(mut self, latest: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.latest = Some(Box::new(latest));
        self
    }

    /// Set the initial-value resolver.
    pub fn with_initial(mut self, initial: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.initial = Some(Box::new(initial));
        self
    }

    /// Set the rollback hook.
    pub fn with_on_rollback(
        mut self,
        on_rollback: impl Fn(&T, &T) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_rollback = Some(Box::new(on_rollback));
        self
    }
}

#[async_trait::async_trait]
impl<T> CursorDriver<T> for FnDriver<T>
where
    T: Send + Sync + 'static,
{
    async fn step(&self, current: T) -> T {
        (self.step)(current)
    }

    async fn latest(&self, current: T) -> bool {
        match &self.latest {
            Some(latest) => latest(&current),
            None => false,
        }
    }

    async fn initial(&self) -> Option<T> {
        self.initial.as_ref().map(|initial| initial())
    }

    async fn on_rollback(&self, from: T, to: T) -> Result<()> {
        match &self.on_rollback {
            Some(on_rollback) => on_rollback(&from, &to),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_step_only_driver_defaults() {
        let driver = FnDriver::new(|c: u64| c + 10);
        assert_eq!(driver.step(0).await, 10);
        assert!(!driver.latest(1_000_000).await);
        assert!(driver.initial().await.is_none());
        assert!(driver.on_rollback(5, 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_full_driver() {
        let driver = FnDriver::new(|c: u64| c + 1)
            .with_latest(|c| *c >= 5)
            .with_initial(|| 3)
            .with_on_rollback(|_, _| Err(anyhow::anyhow!("refuse")));

        assert_eq!(driver.initial().await, Some(3));
        assert!(driver.latest(5).await);
        assert!(!driver.latest(4).await);
        assert!(driver.on_rollback(5, 0).await.is_err());
    }
}
