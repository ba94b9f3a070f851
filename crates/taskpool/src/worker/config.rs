//! Worker pool configuration

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::PoolError;

const ENV_WORKER_COUNT: &str = "TASKPOOL_WORKER_COUNT";
const ENV_QUEUE_CAPACITY: &str = "TASKPOOL_QUEUE_CAPACITY";
const ENV_NAME: &str = "TASKPOOL_NAME";

const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Pool name used in log fields
    pub name: String,

    /// Number of long-lived workers, fixed for the lifetime of the pool
    pub worker_count: usize,

    /// Number of tasks that may wait for a worker (0 = synchronous hand-off)
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        Self {
            worker_count,
            queue_capacity,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Reads `TASKPOOL_WORKER_COUNT`, `TASKPOOL_QUEUE_CAPACITY` and
    /// `TASKPOOL_NAME`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, PoolError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PoolError> {
        let mut config = Self::default();
        if let Some(count) = parse_var(&lookup, ENV_WORKER_COUNT)? {
            config.worker_count = count;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_QUEUE_CAPACITY)? {
            config.queue_capacity = capacity;
        }
        if let Some(name) = lookup(ENV_NAME).filter(|name| !name.trim().is_empty()) {
            config.name = name;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the worker count
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.worker_count == 0 {
            return Err(PoolError::InvalidConfig(
                "worker_count must be greater than 0".into(),
            ));
        }
        let fits = self
            .worker_count
            .checked_add(self.queue_capacity)
            .is_some_and(|total| total <= Semaphore::MAX_PERMITS);
        if !fits {
            return Err(PoolError::InvalidConfig(format!(
                "worker_count + queue_capacity must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, PoolError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PoolError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}
