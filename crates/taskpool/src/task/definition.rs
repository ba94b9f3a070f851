//! Task trait definition

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

/// Result of a single task attempt
pub type TaskResult = Result<(), TaskError>;

/// Error type for task failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task body reported a failure; retried according to the policy
    #[error("{message}")]
    Failed { message: String },

    /// The task body panicked; the panic was contained at the worker boundary
    /// and counts toward the retry budget like any other failure
    #[error("task panicked: {message}")]
    Panicked { message: String },

    /// The task body reported a failure that must not be retried
    #[error("{message}")]
    Fatal { message: String },
}

impl TaskError {
    /// Create a retryable failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Create a non-retryable failure
    ///
    /// The pool stops retrying on the attempt that returns it.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub(crate) fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    /// Whether another attempt may follow this failure
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }

    /// Whether this failure came from a contained panic
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }

    /// The failure cause
    pub fn message(&self) -> &str {
        match self {
            Self::Failed { message } | Self::Panicked { message } | Self::Fatal { message } => {
                message
            }
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::failed(format!("{err:#}"))
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::failed(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::failed(message)
    }
}

/// A unit of work executed by the worker pool
///
/// The pool owns the retry policy: `run` is invoked verbatim on every
/// attempt and carries no memory of earlier attempts unless the task keeps
/// its own state. Tasks that may be retried should be idempotent.
///
/// # Example
///
/// ```ignore
/// use taskpool::prelude::*;
///
/// struct FlushMetrics {
///     sink: MetricsSink,
/// }
///
/// #[async_trait]
/// impl Task for FlushMetrics {
///     async fn run(&self) -> TaskResult {
///         self.sink.flush().await.map_err(TaskError::failed)
///     }
///
///     fn name(&self) -> &str {
///         "flush_metrics"
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Execute one attempt
    async fn run(&self) -> TaskResult;

    /// Name used in log fields
    fn name(&self) -> &str {
        "task"
    }
}

#[async_trait]
impl<T: Task + ?Sized> Task for Arc<T> {
    async fn run(&self) -> TaskResult {
        (**self).run().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: Task + ?Sized> Task for Box<T> {
    async fn run(&self) -> TaskResult {
        (**self).run().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Task built from a closure returning a future
///
/// Created with [`task_fn`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a [`Task`]
///
/// The closure is called once per attempt.
pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    FnTask {
        name: "task".to_string(),
        f,
    }
}

impl<F> FnTask<F> {
    /// Set the name used in log fields
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> std::fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    async fn run(&self) -> TaskResult {
        (self.f)().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
