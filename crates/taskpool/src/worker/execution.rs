//! Task execution with retries and panic containment
//!
//! Every attempt runs behind a catch-unwind boundary. A panicking task body
//! becomes [`TaskError::Panicked`] and is retried like any other failure, so
//! one task can never take its worker down with it.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::backpressure::Slot;
use super::panic_site::{self, PanicSite};
use super::stats::StatsRecorder;
use crate::reliability::RetryPolicy;
use crate::task::{Task, TaskError, TaskResult};

/// A task admitted to the pool, together with everything a worker needs to
/// run it to completion
pub(crate) struct Job {
    pub(crate) id: Uuid,
    pub(crate) task: Box<dyn Task>,
    pub(crate) policy: RetryPolicy,
    pub(crate) result_tx: Option<oneshot::Sender<TaskResult>>,
    pub(crate) slot: Slot,
}

impl Job {
    /// Run all attempts, publish the outcome, then release the slot
    pub(crate) async fn run(self, stats: &StatsRecorder) {
        let outcome = execute(self.id, self.task.as_ref(), &self.policy, stats).await;

        if let Some(tx) = self.result_tx {
            // Receiver may have been dropped; fire-and-forget is fine.
            let _ = tx.send(outcome);
        }
        drop(self.slot);
    }
}

/// Why an attempt did not succeed
#[derive(Debug)]
pub(crate) struct AttemptError {
    pub(crate) error: TaskError,
    /// Set when the attempt panicked and the site was recorded
    pub(crate) panic_site: Option<PanicSite>,
}

impl From<TaskError> for AttemptError {
    fn from(error: TaskError) -> Self {
        Self {
            error,
            panic_site: None,
        }
    }
}

/// Run one attempt behind the unwind boundary
pub(crate) async fn run_attempt(task: &dyn Task) -> Result<(), AttemptError> {
    panic_site::install_recorder();
    match AssertUnwindSafe(task.run()).catch_unwind().await {
        Ok(result) => result.map_err(AttemptError::from),
        Err(payload) => Err(AttemptError {
            error: TaskError::panicked(panic_message(payload.as_ref())),
            panic_site: panic_site::take_last(),
        }),
    }
}

/// Drive a task through its retry policy
///
/// The worker sleeps in place between attempts, so a retrying task keeps
/// its worker busy for the whole backoff.
pub(crate) async fn execute(
    task_id: Uuid,
    task: &dyn Task,
    policy: &RetryPolicy,
    stats: &StatsRecorder,
) -> TaskResult {
    let max_attempts = policy.max_attempts;
    let mut attempt = 1;

    loop {
        let AttemptError { error, panic_site } = match run_attempt(task).await {
            Ok(()) => {
                debug!(%task_id, task = task.name(), attempt, "task succeeded");
                stats.task_succeeded();
                return Ok(());
            }
            Err(failure) => failure,
        };

        if error.is_panic() {
            stats.attempt_panicked();
            let (location, backtrace) = match &panic_site {
                Some(site) => (site.location.as_str(), site.backtrace.to_string()),
                None => ("<unrecorded>", String::new()),
            };
            error!(
                %task_id,
                task = task.name(),
                attempt,
                max_attempts,
                panic = error.message(),
                location,
                backtrace,
                "task panicked, contained at worker boundary"
            );
        }

        if !error.is_retryable() {
            stats.task_failed();
            error!(
                %task_id,
                task = task.name(),
                attempt,
                max_attempts,
                error = %error,
                "task failed permanently after {attempt} attempts: non-retryable error"
            );
            return Err(error);
        }

        if !policy.has_attempts_remaining(attempt) {
            stats.task_failed();
            error!(
                %task_id,
                task = task.name(),
                max_attempts,
                error = %error,
                "task failed permanently after {max_attempts} attempts"
            );
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt + 1);
        stats.retry_scheduled();
        warn!(
            %task_id,
            task = task.name(),
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "attempt {attempt}/{max_attempts} failed: {error}, retrying in {delay:?}"
        );

        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
