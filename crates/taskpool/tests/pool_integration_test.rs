//! Integration tests for WorkerPool and Scheduler
//!
//! Run with: cargo test -p taskpool --test pool_integration_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use taskpool::prelude::*;

/// Task that records the instant of every attempt and fails until
/// `succeed_on` (1-based); `None` fails forever
fn recording_task(
    calls: Arc<Mutex<Vec<Instant>>>,
    succeed_on: Option<usize>,
) -> impl Task {
    task_fn(move || {
        let calls = Arc::clone(&calls);
        async move {
            let attempt = {
                let mut calls = calls.lock();
                calls.push(Instant::now());
                calls.len()
            };
            match succeed_on {
                Some(n) if attempt >= n => Ok(()),
                _ => Err(TaskError::failed(format!("attempt {attempt} failed"))),
            }
        }
    })
    .named("recording")
}

fn counting_task(counter: Arc<AtomicUsize>, work: Duration) -> impl Task {
    task_fn(move || {
        let counter = Arc::clone(&counter);
        async move {
            tokio::time::sleep(work).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

/// Task that holds its worker until `release` flips to true
fn gate_task(release: watch::Receiver<bool>) -> impl Task {
    task_fn(move || {
        let mut release = release.clone();
        async move {
            let _ = release.wait_for(|open| *open).await;
            Ok(())
        }
    })
    .named("gate")
}

fn gaps(calls: &[Instant]) -> Vec<Duration> {
    calls.windows(2).map(|w| w[1] - w[0]).collect()
}

#[test_log::test(tokio::test)]
async fn test_always_failing_task_runs_max_attempts_with_backoff() {
    let pool = WorkerPool::new(1, 1).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let policy = RetryPolicy::exponential(4, Duration::from_millis(20));

    let handle = pool
        .submit_with_result(recording_task(Arc::clone(&calls), None), policy)
        .await
        .unwrap();
    assert_eq!(handle.await, Err(TaskError::failed("attempt 4 failed")));

    let calls = calls.lock().clone();
    assert_eq!(calls.len(), 4);

    let expected = [20, 40, 80].map(Duration::from_millis);
    for (gap, expected) in gaps(&calls).into_iter().zip(expected) {
        assert!(gap >= expected, "gap {gap:?} shorter than {expected:?}");
        assert!(
            gap < expected + Duration::from_millis(100),
            "gap {gap:?} much longer than {expected:?}"
        );
    }

    pool.shutdown().await;
    let stats = pool.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_plus_workers_plus_one_never_deadlocks() {
    let workers = 3;
    let capacity = 2;
    let pool = WorkerPool::new(workers, capacity).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let total = capacity + workers + 1;

    tokio::time::timeout(Duration::from_secs(5), async {
        for _ in 0..total {
            pool.submit(
                counting_task(Arc::clone(&counter), Duration::from_millis(5)),
                RetryPolicy::no_retry(),
            )
            .await
            .unwrap();
        }
        pool.shutdown().await;
    })
    .await
    .expect("submitting C + W + 1 tasks deadlocked");

    assert_eq!(counter.load(Ordering::SeqCst), total);
}

#[tokio::test]
async fn test_shutdown_drains_queued_tasks() {
    let pool = WorkerPool::new(1, 10).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        pool.submit(
            counting_task(Arc::clone(&counter), Duration::from_millis(5)),
            RetryPolicy::no_retry(),
        )
        .await
        .unwrap();
    }
    assert!(pool.pending() > 0);

    pool.shutdown().await;

    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert_eq!(pool.pending(), 0);
    assert_eq!(pool.state(), PoolState::Stopped);
}

#[tokio::test]
async fn test_shutdown_waits_for_retries_to_finish() {
    let pool = WorkerPool::new(1, 1).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));

    pool.submit(
        recording_task(Arc::clone(&calls), Some(3)),
        RetryPolicy::exponential(3, Duration::from_millis(15)),
    )
    .await
    .unwrap();
    pool.shutdown().await;

    assert_eq!(calls.lock().len(), 3);
    assert_eq!(pool.stats().succeeded, 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_panicking_task_does_not_affect_others() {
    let pool = WorkerPool::new(5, 10).unwrap();

    let faulty = pool
        .submit_with_result(
            task_fn(|| async {
                let slots: Vec<u8> = vec![0; 2];
                std::hint::black_box(slots[7]);
                Ok(())
            })
            .named("faulty"),
            RetryPolicy::no_retry(),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..9 {
        handles.push(
            pool.submit_with_result(
                task_fn(|| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                }),
                RetryPolicy::no_retry(),
            )
            .await
            .unwrap(),
        );
    }

    let fault = faulty.await.unwrap_err();
    assert!(fault.is_panic());
    for handle in handles {
        assert_eq!(handle.await, Ok(()));
    }

    pool.shutdown().await;
    let stats = pool.stats();
    assert_eq!(stats.succeeded, 9);
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_panics_never_shrink_the_pool() {
    let pool = WorkerPool::new(2, 4).unwrap();

    for _ in 0..6 {
        pool.submit(
            task_fn(|| async {
                if std::hint::black_box(true) {
                    panic!("task body exploded");
                }
                Ok(())
            }),
            RetryPolicy::no_retry(),
        )
        .await
        .unwrap();
    }

    // Both workers are still around to hold a task each at the same time.
    let started = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = watch::channel(false);
    let mut gates = Vec::new();
    for _ in 0..2 {
        let started = Arc::clone(&started);
        let release_rx = release_rx.clone();
        let gate = task_fn(move || {
            let started = Arc::clone(&started);
            let mut release_rx = release_rx.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                let _ = release_rx.wait_for(|open| *open).await;
                Ok(())
            }
        });
        gates.push(
            pool.submit_with_result(gate, RetryPolicy::no_retry())
                .await
                .unwrap(),
        );
    }

    tokio::time::timeout(Duration::from_secs(1), async {
        while started.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("a worker was lost to a panicking task");

    release_tx.send(true).unwrap();
    for gate in gates {
        assert_eq!(gate.await, Ok(()));
    }
    pool.shutdown().await;
    assert_eq!(pool.stats().panicked, 6);
}

#[tokio::test]
async fn test_submit_after_shutdown_never_runs() {
    let pool = WorkerPool::new(2, 2).unwrap();
    pool.shutdown().await;

    let counter = Arc::new(AtomicUsize::new(0));
    let err = pool
        .submit(
            counting_task(Arc::clone(&counter), Duration::ZERO),
            RetryPolicy::no_retry(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, PoolError::Closed);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(pool.stats().submitted, 0);
}

#[tokio::test]
async fn test_submit_blocks_at_capacity() {
    let pool = WorkerPool::new(1, 0).unwrap();
    let (release_tx, release_rx) = watch::channel(false);
    pool.submit(gate_task(release_rx), RetryPolicy::no_retry())
        .await
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let waiting = {
        let pool = pool.clone();
        let counter = Arc::clone(&counter);
        tokio::spawn(async move {
            pool.submit(counting_task(counter, Duration::ZERO), RetryPolicy::no_retry())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished(), "submit returned while pool was full");

    release_tx.send(true).unwrap();
    waiting.await.unwrap().unwrap();
    pool.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_blocked_submitter_rejected_on_shutdown() {
    let pool = WorkerPool::new(1, 0).unwrap();
    let (release_tx, release_rx) = watch::channel(false);
    pool.submit(gate_task(release_rx), RetryPolicy::no_retry())
        .await
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let waiting = {
        let pool = pool.clone();
        let counter = Arc::clone(&counter);
        tokio::spawn(async move {
            pool.submit(counting_task(counter, Duration::ZERO), RetryPolicy::no_retry())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let shutdown = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown().await })
    };

    let rejected = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("blocked submitter was not woken by shutdown")
        .unwrap();
    assert_eq!(rejected, Err(PoolError::Closed));
    assert_eq!(pool.state(), PoolState::ShuttingDown);

    release_tx.send(true).unwrap();
    shutdown.await.unwrap();
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submit_and_shutdown_loses_nothing() {
    let pool = WorkerPool::new(3, 2).unwrap();
    let executed = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let executed = Arc::clone(&executed);
            tokio::spawn(async move {
                let mut accepted = 0;
                for _ in 0..50 {
                    let task = counting_task(Arc::clone(&executed), Duration::from_millis(1));
                    match pool.submit(task, RetryPolicy::no_retry()).await {
                        Ok(()) => accepted += 1,
                        Err(PoolError::Closed) => break,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                accepted
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.shutdown().await;

    let mut accepted = 0;
    for submitter in submitters {
        accepted += submitter.await.unwrap();
    }

    assert_eq!(executed.load(Ordering::SeqCst), accepted);
    assert_eq!(pool.stats().submitted as usize, accepted);
}

#[tokio::test]
async fn test_concurrent_shutdown_calls_both_wait_for_drain() {
    let pool = WorkerPool::new(1, 4).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        pool.submit(
            counting_task(Arc::clone(&counter), Duration::from_millis(10)),
            RetryPolicy::no_retry(),
        )
        .await
        .unwrap();
    }

    let other = {
        let pool = pool.clone();
        let counter = Arc::clone(&counter);
        tokio::spawn(async move {
            pool.shutdown().await;
            counter.load(Ordering::SeqCst)
        })
    };
    pool.shutdown().await;

    assert_eq!(counter.load(Ordering::SeqCst), 4);
    assert_eq!(other.await.unwrap(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_tick_count() {
    let pool = WorkerPool::new(2, 4).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);

    let job = Scheduler::new(&pool)
        .schedule(Duration::from_millis(100), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(550)).await;
    job.cancel();
    let ticks = job.ticks();
    job.stopped().await;
    pool.shutdown().await;

    assert!((5..=6).contains(&ticks), "expected 5..=6 ticks, got {ticks}");
    assert_eq!(runs.load(Ordering::SeqCst) as u64, ticks);
}

#[test_log::test(tokio::test)]
async fn test_flaky_task_on_hand_off_pool() {
    let pool = WorkerPool::new(2, 0).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let handle = pool
        .submit_with_result(
            recording_task(Arc::clone(&calls), Some(3)),
            RetryPolicy::exponential(3, Duration::from_millis(10))
                .with_backoff_coefficient(2.0),
        )
        .await
        .unwrap();

    assert_eq!(handle.await, Ok(()));

    let calls = calls.lock().clone();
    assert_eq!(calls.len(), 3);
    let gaps = gaps(&calls);
    assert!(gaps[0] >= Duration::from_millis(10));
    assert!(gaps[1] >= Duration::from_millis(20));

    pool.shutdown().await;
    let stats = pool.stats();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.retried, 2);
}

#[tokio::test]
async fn test_pool_from_config() {
    let config = WorkerPoolConfig::new(2, 3).with_name("integration");
    let pool = WorkerPool::with_config(config).unwrap();

    assert_eq!(pool.name(), "integration");
    assert_eq!(pool.capacity(), 5);

    let counter = Arc::new(AtomicUsize::new(0));
    pool.try_submit(
        counting_task(Arc::clone(&counter), Duration::ZERO),
        RetryPolicy::no_retry(),
    )
    .unwrap();
    pool.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_zero_interval_policy_exhausts_and_shuts_down() {
    let pool = WorkerPool::new(1, 0).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let handle = pool
        .submit_with_result(
            recording_task(Arc::clone(&calls), None),
            RetryPolicy::exponential(1100, Duration::ZERO),
        )
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("zero-interval retries stalled");
    assert_eq!(outcome, Err(TaskError::failed("attempt 1100 failed")));
    assert_eq!(calls.lock().len(), 1100);

    tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
        .await
        .expect("shutdown hung after zero-interval retries");
    assert_eq!(pool.stats().retried, 1099);
}

#[tokio::test]
async fn test_vanishing_jitter_keeps_worker_alive() {
    let pool = WorkerPool::new(1, 4).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let flaky = pool
        .submit_with_result(
            recording_task(Arc::clone(&calls), Some(2)),
            RetryPolicy::exponential(2, Duration::from_nanos(1)).with_jitter(5e-324),
        )
        .await
        .unwrap();
    assert_eq!(flaky.await, Ok(()));

    let counter = Arc::new(AtomicUsize::new(0));
    pool.submit(
        counting_task(Arc::clone(&counter), Duration::ZERO),
        RetryPolicy::no_retry(),
    )
    .await
    .unwrap();
    assert!(pool.is_running());

    pool.shutdown().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().succeeded, 2);
}

#[tokio::test]
async fn test_abandoned_shutdown_still_completes_drain() {
    let pool = WorkerPool::new(1, 1).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    pool.submit(
        counting_task(Arc::clone(&counter), Duration::from_millis(200)),
        RetryPolicy::no_retry(),
    )
    .await
    .unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(20), pool.shutdown()).await;
    assert!(abandoned.is_err());
    assert_eq!(pool.state(), PoolState::ShuttingDown);

    tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
        .await
        .expect("second shutdown never observed the drain");
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
