//! Periodic job scheduling on top of a worker pool
//!
//! A [`Scheduler`] turns a job function into a fresh task on every tick and
//! submits it to the pool like any other task. The scheduler only holds a
//! weak reference to the pool; it never keeps the pool alive.
//!
//! A failing job is handled by the pool's retry policy and logged. It does
//! not stop the schedule: only [`ScheduledJob::cancel`], pool shutdown or
//! dropping the pool end it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::PoolError;
use crate::reliability::RetryPolicy;
use crate::task::{task_fn, TaskResult};
use crate::worker::{PoolInner, PoolState, WorkerPool};

/// Periodic task producer bound to one pool
///
/// # Example
///
/// ```ignore
/// use taskpool::prelude::*;
///
/// let scheduler = Scheduler::new(&pool);
/// let job = scheduler.schedule(Duration::from_secs(30), || async {
///     purge_expired_sessions().await?;
///     Ok(())
/// })?;
///
/// // ... later
/// job.cancel();
/// ```
#[derive(Debug, Clone)]
pub struct Scheduler {
    pool: Weak<PoolInner>,
    pool_shutdown: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler submitting into `pool`
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            pool: Arc::downgrade(pool.inner()),
            pool_shutdown: pool.inner().shutdown_token().clone(),
        }
    }

    /// Run `job` every `interval`, without retries
    ///
    /// The first run happens one `interval` after registration.
    pub fn schedule<F, Fut>(&self, interval: Duration, job: F) -> Result<ScheduledJob, PoolError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.schedule_with_policy(interval, RetryPolicy::no_retry(), job)
    }

    /// Run `job` every `interval`, retrying each run according to `policy`
    pub fn schedule_with_policy<F, Fut>(
        &self,
        interval: Duration,
        policy: RetryPolicy,
        job: F,
    ) -> Result<ScheduledJob, PoolError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "schedule interval must be greater than 0".into(),
            ));
        }
        policy.validate()?;

        let running = self
            .pool
            .upgrade()
            .is_some_and(|inner| inner.state() == PoolState::Running);
        if !running {
            return Err(PoolError::Closed);
        }

        let id = Uuid::now_v7();
        let token = self.pool_shutdown.child_token();
        let ticks = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(run_schedule(
            id,
            interval,
            policy,
            Arc::new(job),
            self.pool.clone(),
            token.clone(),
            Arc::clone(&ticks),
        ));

        info!(
            job_id = %id,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Scheduled job registered"
        );

        Ok(ScheduledJob {
            id,
            interval,
            token,
            ticks,
            handle,
        })
    }
}

/// Handle to a running schedule
///
/// Dropping the handle does not stop the schedule; call
/// [`cancel`](Self::cancel).
#[derive(Debug)]
pub struct ScheduledJob {
    id: Uuid,
    interval: Duration,
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl ScheduledJob {
    /// Stop future ticks
    ///
    /// Runs already submitted to the pool are not affected.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if the schedule was cancelled, explicitly or by pool shutdown
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Check if the timer loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Number of runs submitted so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Get the job ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the schedule interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the timer loop to exit
    pub async fn stopped(self) {
        if let Err(e) = self.handle.await {
            error!(job_id = %self.id, "Schedule loop exited abnormally: {}", e);
        }
    }
}

async fn run_schedule<F, Fut>(
    id: Uuid,
    interval: Duration,
    policy: RetryPolicy,
    job: Arc<F>,
    pool: Weak<PoolInner>,
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    let now = Instant::now();
    // Roughly 30 years; stands in for intervals too long to represent
    let first_tick = now
        .checked_add(interval)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30));
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let task_name = format!("scheduled-{id}");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(job_id = %id, "Schedule loop: cancellation requested");
                break;
            }
            _ = ticker.tick() => {}
        }

        let Some(inner) = pool.upgrade() else {
            debug!(job_id = %id, "Schedule loop: pool dropped");
            break;
        };
        let handle = WorkerPool::from_inner(inner);

        let job = Arc::clone(&job);
        let task = task_fn(move || job()).named(task_name.clone());

        let submitted = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            submitted = handle.submit(task, policy.clone()) => submitted,
        };

        match submitted {
            Ok(()) => {
                let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(job_id = %id, tick, "Scheduled run submitted");
            }
            Err(e) => {
                debug!(job_id = %id, "Schedule loop: submission rejected: {}", e);
                break;
            }
        }
    }

    info!(job_id = %id, ticks = ticks.load(Ordering::Relaxed), "Scheduled job stopped");
}
