//! End-to-end scenarios exercising the full engine against the in-process
//! backends: sequential and concurrent claiming, backpressure, zombie
//! recovery, retry routing, and epoch-versioned rollback.

#[cfg(test)]
mod scenario_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::Notify;

    use crate::coord::memory::MemoryCoordinator;
    use crate::{ConsumeOptions, Coordinator, Indexer, RatchetError};

    fn counting_indexer(
        coord: Arc<MemoryCoordinator>,
        name: &str,
    ) -> Arc<Indexer<u64>> {
        Arc::new(
            Indexer::<u64>::builder(name)
                .initial(0)
                .step_fn(|c| c + 1)
                .coordinator(coord)
                .build()
                .unwrap(),
        )
    }

    // ==========================================================================
    // Sequential claiming
    // ==========================================================================

    #[tokio::test]
    async fn test_sequential_atomic_claims() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = counting_indexer(coord, "blocks");

        for expected in 0..3u64 {
            let claim = indexer.atomic().await.unwrap();
            assert_eq!(claim.start, expected);
            assert_eq!(claim.ended, expected + 1);
            assert_eq!(claim.epoch, 0);
        }
        assert_eq!(indexer.current().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_atomic_at_terminal_boundary_does_not_mutate() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = Indexer::<u64>::builder("blocks")
            .initial(0)
            .step_fn(|c| c + 1)
            .latest_fn(|c| *c >= 5)
            .coordinator(coord)
            .build()
            .unwrap();

        indexer.next(Some(5)).await.unwrap();
        let result = indexer.atomic().await;
        assert!(matches!(
            result,
            Err(RatchetError::ReachedLatest { ref cursor }) if cursor.as_str() == "5"
        ));
        assert_eq!(indexer.current().await.unwrap(), 5);
    }

    // ==========================================================================
    // Concurrent claiming
    // ==========================================================================

    #[tokio::test]
    async fn test_concurrent_atomic_claims_form_permutation() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = counting_indexer(coord, "blocks");

        let claims = futures::future::join_all((0..8).map(|_| {
            let indexer = indexer.clone();
            async move { indexer.atomic().await.unwrap() }
        }))
        .await;

        let mut starts: Vec<u64> = claims.iter().map(|c| c.start).collect();
        starts.sort_unstable();
        assert_eq!(starts, (0..8).collect::<Vec<u64>>());
        for claim in &claims {
            assert_eq!(claim.ended, claim.start + 1);
            assert_eq!(claim.epoch, 0);
        }
        assert_eq!(indexer.current().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_two_parallel_consumes_get_distinct_intervals() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = Arc::new(
            Indexer::<u64>::builder("blocks")
                .initial(0)
                .step_fn(|c| c + 10)
                .coordinator(coord.clone())
                .build()
                .unwrap(),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let consume = |indexer: Arc<Indexer<u64>>, seen: Arc<Mutex<Vec<(u64, u64)>>>| async move {
            indexer
                .consume(move |start, ended, _epoch| async move {
                    seen.lock().unwrap().push((start, ended));
                    Ok(())
                })
                .await
                .unwrap();
        };

        tokio::join!(
            consume(indexer.clone(), seen.clone()),
            consume(indexer.clone(), seen.clone()),
        );

        let mut pairs = seen.lock().unwrap().clone();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 10), (10, 20)]);
        assert_eq!(indexer.current().await.unwrap(), 20);
        assert_eq!(
            coord.list_len("indexer:blocks:concurrency").await.unwrap(),
            0
        );
    }

    // ==========================================================================
    // Backpressure
    // ==========================================================================

    #[tokio::test]
    async fn test_concurrency_cap_backpressures_second_consume() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = Arc::new(
            Indexer::<u64>::builder("blocks")
                .initial(0)
                .step_fn(|c| c + 1)
                .concurrency(1)
                .coordinator(coord)
                .build()
                .unwrap(),
        );

        let entered = Arc::new(Notify::new());
        let unblock = Arc::new(Notify::new());

        let first = tokio::spawn({
            let indexer = indexer.clone();
            let entered = entered.clone();
            let unblock = unblock.clone();
            async move {
                indexer
                    .consume(move |_start, _ended, _epoch| async move {
                        entered.notify_one();
                        unblock.notified().await;
                        Ok(())
                    })
                    .await
                    .unwrap()
            }
        });

        entered.notified().await;
        assert_eq!(indexer.current().await.unwrap(), 1);

        // The cap is full: the second tick must not invoke its callback or
        // touch the cursor.
        let invoked = Arc::new(AtomicUsize::new(0));
        let outcome = indexer
            .consume({
                let invoked = invoked.clone();
                move |_start, _ended, _epoch| async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_backpressured());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(indexer.current().await.unwrap(), 1);

        unblock.notify_one();
        assert!(first.await.unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_consume_at_terminal_boundary_reports_reached_latest() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = Indexer::<u64>::builder("blocks")
            .initial(5)
            .step_fn(|c| c + 1)
            .latest_fn(|c| *c >= 5)
            .coordinator(coord)
            .build()
            .unwrap();

        let invoked = Arc::new(AtomicUsize::new(0));
        let outcome = indexer
            .consume({
                let invoked = invoked.clone();
                move |_start, _ended, _epoch| async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_reached_latest());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(indexer.current().await.unwrap(), 5);
    }

    // ==========================================================================
    // Failure routing and retry
    // ==========================================================================

    #[tokio::test]
    async fn test_failed_interval_is_replayed_in_fifo_order() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = counting_indexer(coord.clone(), "blocks");

        for _ in 0..2 {
            let err = indexer
                .consume(|_start, _ended, _epoch| async move {
                    Err(anyhow::anyhow!("downstream unavailable"))
                })
                .await;
            assert!(matches!(err, Err(RatchetError::Callback(_))));
        }
        assert_eq!(coord.list_len("indexer:blocks:failed").await.unwrap(), 2);

        // Retry lane drains oldest-first, before any fresh claim.
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = seen.clone();
            indexer
                .consume(move |start, _ended, _epoch| async move {
                    seen.lock().unwrap().push(start);
                    Ok(())
                })
                .await
                .unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(coord.list_len("indexer:blocks:failed").await.unwrap(), 0);
        assert_eq!(indexer.current().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retry_opt_out_leaves_queue_unchanged() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = counting_indexer(coord.clone(), "blocks");

        let err = indexer
            .consume_with(
                ConsumeOptions { retry: false },
                |_start, _ended, _epoch| async move { Err(anyhow::anyhow!("nope")) },
            )
            .await;

        assert!(matches!(err, Err(RatchetError::Callback(_))));
        assert_eq!(coord.list_len("indexer:blocks:failed").await.unwrap(), 0);
        assert_eq!(coord.list_len("indexer:blocks:concurrency").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_epoch_failure_is_dropped_not_retried() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = counting_indexer(coord.clone(), "blocks");

        // The epoch moves while the callback is running; its failure must
        // not reach the retry queue, but must still surface.
        let err = indexer
            .consume({
                let coord = coord.clone();
                move |_start, _ended, _epoch| async move {
                    coord.incr("indexer:blocks:epoch").await.unwrap();
                    Err(anyhow::anyhow!("stale work"))
                }
            })
            .await;

        assert!(matches!(err, Err(RatchetError::Callback(_))));
        assert_eq!(coord.list_len("indexer:blocks:failed").await.unwrap(), 0);
        assert_eq!(coord.list_len("indexer:blocks:concurrency").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_occupy_release_balance_across_mixed_outcomes() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = counting_indexer(coord.clone(), "blocks");

        for i in 0..6u64 {
            let result = indexer
                .consume(move |_start, _ended, _epoch| async move {
                    if i % 2 == 0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("flaky"))
                    }
                })
                .await;
            assert_eq!(result.is_err(), i % 2 == 1);
        }

        assert_eq!(coord.list_len("indexer:blocks:concurrency").await.unwrap(), 0);
        assert_eq!(coord.list_len("indexer:blocks:failed").await.unwrap(), 3);
    }

    // ==========================================================================
    // Zombie recovery
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_zombie_is_reaped_and_replayed_with_same_start() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = Arc::new(
            Indexer::<u64>::builder("blocks")
                .initial(0)
                .step_fn(|c| c + 1)
                .running_timeout(Duration::from_secs(1))
                .concurrency_timeout(Duration::from_secs(10))
                .coordinator(coord.clone())
                .build()
                .unwrap(),
        );

        // A consume whose callback outlives its shadow.
        let stuck = tokio::spawn({
            let indexer = indexer.clone();
            async move {
                indexer
                    .consume(|_start, _ended, _epoch| async move {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        Ok(())
                    })
                    .await
            }
        });

        // Wait until the stuck task has occupied its slot.
        while coord.list_len("indexer:blocks:concurrency").await.unwrap() == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::advance(Duration::from_secs(2)).await;
        indexer.cleanup().await.unwrap();
        assert_eq!(coord.list_len("indexer:blocks:failed").await.unwrap(), 1);

        // Another worker picks the interval back up through the retry lane,
        // with the original start value.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let outcome = indexer
            .consume({
                let seen = seen.clone();
                move |start, ended, _epoch| async move {
                    seen.lock().unwrap().push((start, ended));
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(*seen.lock().unwrap(), vec![(0, 1)]);

        tokio::time::advance(Duration::from_secs(2)).await;
        stuck.await.unwrap().unwrap();
        assert_eq!(coord.list_len("indexer:blocks:concurrency").await.unwrap(), 0);
    }

    // ==========================================================================
    // Rollback and epochs
    // ==========================================================================

    #[tokio::test]
    async fn test_rollback_observes_hook_and_rotates_epoch() {
        let coord = Arc::new(MemoryCoordinator::new());
        let observed = Arc::new(Mutex::new(None));
        let indexer = Indexer::<u64>::builder("blocks")
            .initial(0)
            .step_fn(|c| c + 1)
            .on_rollback_fn({
                let observed = observed.clone();
                move |from, to| {
                    *observed.lock().unwrap() = Some((*from, *to));
                    Ok(())
                }
            })
            .coordinator(coord)
            .build()
            .unwrap();

        indexer.next(Some(10)).await.unwrap();
        let pre = indexer.epoch().await.unwrap();

        indexer.rollback(5).await.unwrap();

        assert_eq!(*observed.lock().unwrap(), Some((10, 5)));
        assert_eq!(indexer.current().await.unwrap(), 5);
        assert!(!indexer.validate(pre).await.unwrap());
        let post = indexer.epoch().await.unwrap();
        assert!(indexer.validate(post).await.unwrap());
        assert!(post > pre);
    }

    #[tokio::test]
    async fn test_rollback_wipes_live_and_retry_state() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = counting_indexer(coord.clone(), "blocks");

        // Leave residue in both lanes: one failed interval and one claim.
        let _ = indexer
            .consume(|_start, _ended, _epoch| async move {
                Err(anyhow::anyhow!("will be wiped"))
            })
            .await;
        indexer.atomic().await.unwrap();
        assert_eq!(coord.list_len("indexer:blocks:failed").await.unwrap(), 1);

        indexer.rollback(0).await.unwrap();

        assert_eq!(indexer.current().await.unwrap(), 0);
        assert_eq!(coord.list_len("indexer:blocks:concurrency").await.unwrap(), 0);
        assert_eq!(coord.list_len("indexer:blocks:failed").await.unwrap(), 0);
        assert_eq!(indexer.epoch().await.unwrap(), 1);

        // A fresh claim starts over from the rollback target, next epoch.
        let claim = indexer.atomic().await.unwrap();
        assert_eq!(claim.start, 0);
        assert_eq!(claim.epoch, 1);
    }

    #[tokio::test]
    async fn test_rollback_hook_failure_aborts() {
        let coord = Arc::new(MemoryCoordinator::new());
        let indexer = Indexer::<u64>::builder("blocks")
            .initial(0)
            .step_fn(|c| c + 1)
            .on_rollback_fn(|_from, _to| Err(anyhow::anyhow!("refuse to rewind")))
            .coordinator(coord)
            .build()
            .unwrap();

        indexer.next(Some(10)).await.unwrap();
        let result = indexer.rollback(5).await;

        assert!(matches!(result, Err(RatchetError::Callback(_))));
        assert_eq!(indexer.current().await.unwrap(), 10);
        assert_eq!(indexer.epoch().await.unwrap(), 0);
    }
}
