//! Concurrency accountant: admission, occupy, release.
//!
//! The live-task list records every dispatched start value; its length is
//! the cluster-wide in-flight count that admission tests against. Each
//! occupied start also gets a TTL-bounded shadow key — the shadow outliving
//! its task is what lets the reaper tell a running task from a dead one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Keys;
use crate::coord::{CoordOp, Coordinator};
use crate::error::RatchetError;

pub struct ConcurrencyGauge {
    coord: Arc<dyn Coordinator>,
    keys: Keys,
    name: String,
    cap: Option<usize>,
    running_timeout: Duration,
    concurrency_timeout: Duration,
}

impl ConcurrencyGauge {
    pub fn new(
        coord: Arc<dyn Coordinator>,
        keys: Keys,
        name: String,
        cap: Option<usize>,
        running_timeout: Duration,
        concurrency_timeout: Duration,
    ) -> Self {
        Self {
            coord,
            keys,
            name,
            cap,
            running_timeout,
            concurrency_timeout,
        }
    }

    /// Admission test: is there room under the concurrency cap?
    ///
    /// Rejection is backpressure, not an error. With no cap configured,
    /// admission always passes.
    pub async fn admitted(&self) -> Result<bool, RatchetError> {
        let Some(cap) = self.cap else {
            return Ok(true);
        };
        let live = self
            .coord
            .list_len(&self.keys.live)
            .await
            .map_err(RatchetError::Coordinator)?;
        if live >= cap {
            debug!(name = %self.name, live, cap, "concurrency cap reached, skipping dispatch");
            return Ok(false);
        }
        Ok(true)
    }

    /// Current length of the live-task list.
    pub async fn live_count(&self) -> Result<usize, RatchetError> {
        self.coord
            .list_len(&self.keys.live)
            .await
            .map_err(RatchetError::Coordinator)
    }

    /// Record a dispatched start: one round trip appending it to the live
    /// list, planting its shadow, and refreshing the list's sliding TTL.
    pub async fn occupy(&self, encoded: &str) -> Result<(), RatchetError> {
        self.coord
            .batch(vec![
                CoordOp::Push {
                    key: self.keys.live.clone(),
                    value: encoded.to_string(),
                },
                CoordOp::SetEx {
                    key: self.keys.shadow(encoded),
                    value: "1".to_string(),
                    ttl: self.running_timeout,
                },
                CoordOp::Expire {
                    key: self.keys.live.clone(),
                    ttl: self.concurrency_timeout,
                },
            ])
            .await
            .map_err(RatchetError::Coordinator)
    }

    /// Remove a start from the accounting: at most one live-list entry, and
    /// its shadow.
    ///
    /// Never fails into the caller. A release runs on every exit path of
    /// `consume`, including after a callback error, and a coordinator
    /// hiccup here must not mask that error; the shadow TTL and the reaper
    /// eventually repair any accounting the failed round trip left behind.
    pub async fn release(&self, encoded: &str) {
        let result = self
            .coord
            .batch(vec![
                CoordOp::Remove {
                    key: self.keys.live.clone(),
                    value: encoded.to_string(),
                },
                CoordOp::Del {
                    key: self.keys.shadow(encoded),
                },
            ])
            .await;
        if let Err(e) = result {
            warn!(name = %self.name, start = %encoded, error = %e, "failed to release task accounting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::memory::MemoryCoordinator;

    fn gauge(coord: Arc<MemoryCoordinator>, cap: Option<usize>) -> ConcurrencyGauge {
        ConcurrencyGauge::new(
            coord,
            Keys::new("test"),
            "test".to_string(),
            cap,
            Duration::from_secs(60),
            Duration::from_secs(120),
        )
    }

    #[tokio::test]
    async fn test_admission_disabled_without_cap() {
        let coord = Arc::new(MemoryCoordinator::new());
        let gauge = gauge(coord, None);
        for _ in 0..10 {
            assert!(gauge.admitted().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_admission_respects_cap() {
        let coord = Arc::new(MemoryCoordinator::new());
        let gauge = gauge(coord, Some(2));

        assert!(gauge.admitted().await.unwrap());
        gauge.occupy("0").await.unwrap();
        assert!(gauge.admitted().await.unwrap());
        gauge.occupy("1").await.unwrap();
        assert!(!gauge.admitted().await.unwrap());

        gauge.release("0").await;
        assert!(gauge.admitted().await.unwrap());
    }

    #[tokio::test]
    async fn test_occupy_plants_shadow() {
        let coord = Arc::new(MemoryCoordinator::new());
        let keys = Keys::new("test");
        let gauge = gauge(coord.clone(), None);

        gauge.occupy("7").await.unwrap();
        assert_eq!(coord.list_range(&keys.live).await.unwrap(), vec!["7"]);
        assert!(coord.exists(&keys.shadow("7")).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_is_balanced_and_exact() {
        let coord = Arc::new(MemoryCoordinator::new());
        let keys = Keys::new("test");
        let gauge = gauge(coord.clone(), None);

        gauge.occupy("7").await.unwrap();
        gauge.occupy("8").await.unwrap();
        gauge.release("7").await;

        assert_eq!(coord.list_range(&keys.live).await.unwrap(), vec!["8"]);
        assert!(!coord.exists(&keys.shadow("7")).await.unwrap());
        assert!(coord.exists(&keys.shadow("8")).await.unwrap());

        gauge.release("8").await;
        assert_eq!(gauge.live_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_of_unknown_start_is_noop() {
        let coord = Arc::new(MemoryCoordinator::new());
        let gauge = gauge(coord, None);
        gauge.release("never-occupied").await;
        assert_eq!(gauge.live_count().await.unwrap(), 0);
    }
}
