//! Worker pool for task execution
//!
//! Manages a fixed set of workers consuming one shared queue, with bounded
//! admission and drain-based graceful shutdown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, Instrument};
use uuid::Uuid;

use super::backpressure::{BackpressureState, Slot};
use super::config::WorkerPoolConfig;
use super::execution::{panic_message, Job};
use super::stats::{PoolStats, StatsRecorder};
use crate::error::PoolError;
use crate::reliability::RetryPolicy;
use crate::task::{task_fn, Task, TaskError, TaskResult};

/// Worker pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting and executing tasks
    Running,
    /// Admission closed, draining accepted tasks
    ShuttingDown,
    /// All accepted tasks finished and every worker exited
    Stopped,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Shared pool state. Workers never hold it, so dropping every
/// [`WorkerPool`] handle closes the queue and lets workers drain and exit.
pub(crate) struct PoolInner {
    id: Uuid,
    config: WorkerPoolConfig,
    backpressure: Arc<BackpressureState>,
    stats: Arc<StatsRecorder>,
    /// Admission point: `Some` while running. Submission and shutdown both
    /// decide under this lock.
    queue_tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    state_tx: watch::Sender<PoolState>,
    shutdown_token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolInner {
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    pub(crate) fn state(&self) -> PoolState {
        *self.state_tx.borrow()
    }

    async fn enqueue(
        &self,
        task: Box<dyn Task>,
        policy: RetryPolicy,
        result_tx: Option<oneshot::Sender<TaskResult>>,
    ) -> Result<Uuid, PoolError> {
        policy.validate()?;
        let permit = self.backpressure.acquire().await?;
        self.admit(permit, task, policy, result_tx)
    }

    fn try_enqueue(
        &self,
        task: Box<dyn Task>,
        policy: RetryPolicy,
        result_tx: Option<oneshot::Sender<TaskResult>>,
    ) -> Result<Uuid, PoolError> {
        policy.validate()?;
        let permit = self.backpressure.try_acquire()?;
        self.admit(permit, task, policy, result_tx)
    }

    /// Accept the task in full or reject it; never half-way
    fn admit(
        &self,
        permit: OwnedSemaphorePermit,
        task: Box<dyn Task>,
        policy: RetryPolicy,
        result_tx: Option<oneshot::Sender<TaskResult>>,
    ) -> Result<Uuid, PoolError> {
        let guard = self.queue_tx.lock();
        let Some(queue_tx) = guard.as_ref() else {
            return Err(PoolError::Closed);
        };

        let id = Uuid::now_v7();
        let task_name = task.name().to_string();
        let job = Job {
            id,
            task,
            policy,
            result_tx,
            slot: Slot::occupy(&self.backpressure, permit),
        };

        // Only fails if every worker is gone; the job (and its slot) is dropped.
        queue_tx.send(job).map_err(|_| PoolError::Closed)?;
        self.stats.task_submitted();
        trace!(task_id = %id, task = %task_name, "task queued");
        Ok(id)
    }
}

/// Handle to a pending task result
///
/// Resolves to the final outcome after the task's last attempt.
#[derive(Debug)]
pub struct TaskHandle {
    id: Uuid,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    /// Get the task ID
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(TaskError::fatal("task abandoned before completion")))
        })
    }
}

/// Worker pool for executing tasks
///
/// Cheap to clone; all clones share the same queue and workers. Pass a
/// handle to every component that submits work.
///
/// # Failure visibility
///
/// [`submit`](Self::submit) is fire-and-forget: once a task is accepted its
/// failures are retried and logged inside the pool, never reported back.
/// Use [`submit_with_result`](Self::submit_with_result) when the caller needs
/// the final outcome.
///
/// # Example
///
/// ```ignore
/// use taskpool::prelude::*;
///
/// let pool = WorkerPool::new(4, 16)?;
///
/// pool.submit(
///     task_fn(|| async { send_digest().await.map_err(TaskError::from) }),
///     RetryPolicy::exponential(3, Duration::from_millis(100)),
/// )
/// .await?;
///
/// // ... later, graceful shutdown
/// pool.shutdown().await;
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool and start `worker_count` workers
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self, PoolError> {
        Self::with_config(WorkerPoolConfig::new(worker_count, queue_capacity))
    }

    /// Create a pool from a configuration and start its workers
    pub fn with_config(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let id = Uuid::now_v7();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Job>();
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let (state_tx, _) = watch::channel(PoolState::Running);
        let backpressure = Arc::new(BackpressureState::new(
            config.worker_count,
            config.queue_capacity,
        ));
        let stats = Arc::new(StatsRecorder::default());

        let workers = (0..config.worker_count)
            .map(|index| {
                let span = tracing::debug_span!("worker", pool = %config.name, worker = index);
                tokio::spawn(
                    worker_loop(index, Arc::clone(&queue_rx), Arc::clone(&stats)).instrument(span),
                )
            })
            .collect();

        info!(
            pool_id = %id,
            pool = %config.name,
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                config,
                backpressure,
                stats,
                queue_tx: Mutex::new(Some(queue_tx)),
                state_tx,
                shutdown_token: CancellationToken::new(),
                workers: Mutex::new(workers),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<PoolInner> {
        &self.inner
    }

    /// Submit a task, waiting while the pool is at capacity
    ///
    /// Fails with [`PoolError::Closed`] if the pool is not running, including
    /// when shutdown begins while this call is waiting for a slot.
    pub async fn submit<T: Task>(&self, task: T, policy: RetryPolicy) -> Result<(), PoolError> {
        self.inner
            .enqueue(Box::new(task), policy, None)
            .await
            .map(|_| ())
    }

    /// Submit a task without waiting
    ///
    /// Fails with [`PoolError::QueueFull`] when no slot is free.
    pub fn try_submit<T: Task>(&self, task: T, policy: RetryPolicy) -> Result<(), PoolError> {
        self.inner
            .try_enqueue(Box::new(task), policy, None)
            .map(|_| ())
    }

    /// Submit a task and get a handle resolving to its final outcome
    pub async fn submit_with_result<T: Task>(
        &self,
        task: T,
        policy: RetryPolicy,
    ) -> Result<TaskHandle, PoolError> {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.enqueue(Box::new(task), policy, Some(tx)).await?;
        Ok(TaskHandle { id, rx })
    }

    /// Submit a closure that runs once, without retries
    pub async fn execute<F, Fut>(&self, f: F) -> Result<(), PoolError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.submit(task_fn(f), RetryPolicy::no_retry()).await
    }

    /// Shut the pool down gracefully
    ///
    /// Closes admission, rejects waiting submitters, then waits until every
    /// accepted task (queued ones included) has finished all its attempts.
    /// Running tasks are never interrupted. Calling it again, concurrently or
    /// later, waits for the same drain and returns once the pool is stopped.
    ///
    /// The drain runs in its own task; dropping this future does not stop it.
    #[instrument(skip(self), fields(pool_id = %self.inner.id, pool = %self.inner.config.name))]
    pub async fn shutdown(&self) {
        let initiated = {
            let mut queue_tx = self.inner.queue_tx.lock();
            let initiated = queue_tx.take().is_some();
            if initiated {
                self.inner.state_tx.send_replace(PoolState::ShuttingDown);
            }
            initiated
        };

        if initiated {
            info!(pending = self.pending(), "Initiating graceful shutdown");

            self.inner.backpressure.close();
            self.inner.shutdown_token.cancel();

            // The drain owns the worker handles, so dropping this future
            // never leaves the pool stuck in ShuttingDown.
            let workers = std::mem::take(&mut *self.inner.workers.lock());
            tokio::spawn(
                drain(Arc::clone(&self.inner), workers).instrument(tracing::Span::current()),
            );
        } else {
            debug!("Shutdown already in progress, waiting for drain");
        }

        let mut state_rx = self.inner.state_tx.subscribe();
        let _ = state_rx
            .wait_for(|state| *state == PoolState::Stopped)
            .await;
    }

    /// Get current state
    pub fn state(&self) -> PoolState {
        self.inner.state()
    }

    /// Check if the pool is running
    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Check if a submission would proceed without waiting
    pub fn is_accepting(&self) -> bool {
        self.is_running() && self.inner.backpressure.is_accepting()
    }

    /// Get the number of queued and executing tasks
    pub fn pending(&self) -> usize {
        self.inner.backpressure.current_load()
    }

    /// Get the number of free admission slots
    pub fn available_slots(&self) -> usize {
        self.inner.backpressure.available_slots()
    }

    /// Get the maximum number of queued and executing tasks
    pub fn capacity(&self) -> usize {
        self.inner.backpressure.max_load()
    }

    /// Get the pool ID
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Get the pool name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Get the worker count
    pub fn worker_count(&self) -> usize {
        self.inner.config.worker_count
    }

    /// Get the queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.inner.config.queue_capacity
    }

    /// Get a snapshot of the execution counters
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.snapshot()
    }
}

/// Join every worker, then publish `Stopped`
async fn drain(inner: Arc<PoolInner>, workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Worker exited abnormally: {}", e);
        }
    }

    inner.state_tx.send_replace(PoolState::Stopped);
    let stats = inner.stats.snapshot();
    info!(
        submitted = stats.submitted,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Worker pool stopped"
    );
}

async fn worker_loop(
    index: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    stats: Arc<StatsRecorder>,
) {
    debug!(worker = index, "Worker started");

    loop {
        let next = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };

        // Queue closed and drained
        let Some(job) = next else {
            break;
        };

        let task_id = job.id;
        let span = tracing::info_span!("task", task_id = %task_id, task = %job.task.name());
        // Task bodies are already contained per attempt; this keeps the
        // worker alive if anything around them panics.
        let outcome = AssertUnwindSafe(job.run(&stats))
            .catch_unwind()
            .instrument(span)
            .await;
        if let Err(payload) = outcome {
            stats.task_failed();
            error!(
                %task_id,
                worker = index,
                panic = %panic_message(payload.as_ref()),
                "task execution panicked outside the task body, worker recovered"
            );
        }
    }

    debug!(worker = index, "Worker exited");
}
