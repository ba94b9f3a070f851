//! # Task Pool
//!
//! An in-process task execution engine built on Tokio.
//!
//! ## Features
//!
//! - **Fixed worker pool**: a set number of long-lived workers consume one shared queue
//! - **Backpressure**: submitters wait when the queue is full, nothing is dropped
//! - **Automatic retries**: per-task retry policies with exponential backoff
//! - **Panic containment**: a panicking task fails like any other, its worker survives
//! - **Periodic scheduling**: interval jobs submitted through the same pool
//! - **Graceful shutdown**: admission closes, every accepted task is drained
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                             │
//! │  (timer loop, builds one task per tick, weak pool handle)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ submit
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  (bounded admission, shared queue, lifecycle state)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Workers                              │
//! │  (catch_unwind boundary, RetryPolicy backoff, logging)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use taskpool::prelude::*;
//!
//! let pool = WorkerPool::new(4, 32)?;
//!
//! pool.submit(
//!     task_fn(|| async {
//!         deliver_webhook().await?;
//!         Ok(())
//!     }),
//!     RetryPolicy::exponential(3, Duration::from_millis(200)),
//! )
//! .await?;
//!
//! let heartbeat = Scheduler::new(&pool).schedule(Duration::from_secs(10), || async {
//!     report_liveness().await?;
//!     Ok(())
//! })?;
//!
//! // ...
//! heartbeat.cancel();
//! pool.shutdown().await;
//! ```

pub mod error;
pub mod reliability;
pub mod scheduler;
pub mod task;
pub mod worker;

mod serde_duration;

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::PoolError;
    pub use crate::reliability::RetryPolicy;
    pub use crate::scheduler::{ScheduledJob, Scheduler};
    pub use crate::task::{task_fn, Task, TaskError, TaskResult};
    pub use crate::worker::{PoolState, TaskHandle, WorkerPool, WorkerPoolConfig};
    pub use async_trait::async_trait;
    pub use std::time::Duration;
}

// Re-export key types at crate root
pub use error::PoolError;
pub use reliability::RetryPolicy;
pub use scheduler::{ScheduledJob, Scheduler};
pub use task::{task_fn, FnTask, Task, TaskError, TaskResult};
pub use worker::{PoolState, PoolStats, TaskHandle, WorkerPool, WorkerPoolConfig};
