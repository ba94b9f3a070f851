//! Pool-level errors
//!
//! Everything that happens after a task has been accepted is handled inside
//! the pool. These errors only describe synchronous rejections.

/// Errors surfaced synchronously by the pool and the scheduler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool is shutting down or stopped and no longer admits tasks
    #[error("worker pool is closed")]
    Closed,

    /// No free slot for a non-blocking submission
    #[error("worker pool queue is full")]
    QueueFull,

    /// Invalid pool or schedule configuration
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Invalid retry policy
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
}

impl PoolError {
    /// Whether this is the pool-closed rejection
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
