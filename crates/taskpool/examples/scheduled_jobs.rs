//! Worker pool with retries and a periodic job
//!
//! Run with: RUST_LOG=taskpool=debug cargo run -p taskpool --example scheduled_jobs
//!
//! Pool sizing is read from TASKPOOL_WORKER_COUNT / TASKPOOL_QUEUE_CAPACITY.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use taskpool::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskpool=info,scheduled_jobs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerPoolConfig::from_env()?.with_name("demo");
    let pool = WorkerPool::with_config(config)?;
    tracing::info!(workers = pool.worker_count(), capacity = pool.queue_capacity(), "Pool ready");

    // Fails twice, then succeeds on the third attempt.
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = pool
        .submit_with_result(
            task_fn(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 3 {
                        return Err(TaskError::failed(format!("upstream unavailable ({attempt})")));
                    }
                    Ok(())
                }
            })
            .named("flaky_upstream"),
            RetryPolicy::exponential(3, Duration::from_millis(100)),
        )
        .await?;

    // Panics on every run; the pool keeps going.
    pool.submit(
        task_fn(|| async {
            let empty: Vec<u32> = Vec::new();
            std::hint::black_box(empty[0]);
            Ok(())
        })
        .named("faulty"),
        RetryPolicy::with_retries(1, Duration::from_millis(50)),
    )
    .await?;

    let ticks = Arc::new(AtomicU32::new(0));
    let tick_counter = Arc::clone(&ticks);
    let heartbeat = Scheduler::new(&pool).schedule(Duration::from_millis(250), move || {
        let tick_counter = Arc::clone(&tick_counter);
        async move {
            let tick = tick_counter.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!(tick, "heartbeat");
            if tick % 3 == 0 {
                return Err(TaskError::failed("heartbeat sink rejected the beat"));
            }
            Ok(())
        }
    })?;

    let outcome = flaky.await;
    tracing::info!(?outcome, attempts = attempts.load(Ordering::SeqCst), "Flaky task finished");

    tokio::time::sleep(Duration::from_secs(2)).await;
    heartbeat.cancel();
    pool.shutdown().await;

    let stats = pool.stats();
    tracing::info!(
        submitted = stats.submitted,
        succeeded = stats.succeeded,
        failed = stats.failed,
        panicked = stats.panicked,
        retried = stats.retried,
        "Done"
    );
    Ok(())
}
