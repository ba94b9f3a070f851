//! Worker pool for task execution
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed-size pool with bounded admission and graceful shutdown
//! - [`WorkerPoolConfig`] - Pool sizing, loadable from the environment
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │                                                              │
//! │  submit() ──► BackpressureState ──► admission lock ──┐       │
//! │              (capacity + workers)   (Running?)       │       │
//! │                                                      ▼       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  shared queue                        │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │              │                    │                │
//! │         ▼              ▼                    ▼                │
//! │  [Worker 0]      [Worker 1]    ...    [Worker N-1]           │
//! │  catch_unwind + retry/backoff per task                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use taskpool::worker::{WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::with_config(WorkerPoolConfig::from_env()?)?;
//!
//! pool.execute(|| async {
//!     refresh_cache().await?;
//!     Ok(())
//! })
//! .await?;
//!
//! // Graceful shutdown
//! pool.shutdown().await;
//! ```

mod backpressure;
mod config;
mod execution;
mod panic_site;
mod pool;
mod stats;

pub use config::WorkerPoolConfig;
pub use pool::{PoolState, TaskHandle, WorkerPool};
pub(crate) use pool::PoolInner;
pub use stats::PoolStats;
