//! Per-task retry policies and backoff delays

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::serde_duration::{duration_millis, option_duration_millis};

/// Configuration for task retries
///
/// Attached to a task at submission time. The delay before retry `k`
/// (`k >= 1`) is `initial_interval * backoff_coefficient^(k-1)`, optionally
/// capped by `max_interval` and spread by `jitter`.
///
/// # Example
///
/// ```
/// use taskpool::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(4, Duration::from_millis(10));
///
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(10));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(20));
/// assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(40));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total runs allowed, the first one included (1 = never retried)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Backoff multiplier, at least 1.0
    pub backoff_coefficient: f64,

    /// Upper bound for a single delay
    #[serde(default, with = "option_duration_millis")]
    pub max_interval: Option<Duration>,

    /// Fraction of each delay that may be randomly added or removed
    ///
    /// 0.1 spreads a 1s delay over 900ms..1100ms.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    /// Single attempt, failures are final
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            backoff_coefficient: 2.0,
            max_interval: None,
            jitter: 0.0,
        }
    }

    /// Create an exponential backoff policy with a 2x coefficient
    pub fn exponential(max_attempts: u32, initial_interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval,
            ..Self::no_retry()
        }
    }

    /// Same delay before every retry
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            backoff_coefficient: 1.0,
            ..Self::no_retry()
        }
    }

    /// Create a policy from a retry count: `retries` extra attempts after the
    /// first one, with the delay doubling from `delay`
    pub fn with_retries(retries: u32, delay: Duration) -> Self {
        Self::exponential(retries.saturating_add(1), delay)
    }

    /// Override the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the delay before the first retry
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Override the growth factor between consecutive delays
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Cap every delay at `interval`
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    /// Spread delays by `jitter`, clamped to 0.0..=1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_attempts == 0 {
            return Err(PoolError::InvalidPolicy(
                "max_attempts must be at least 1".into(),
            ));
        }
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(PoolError::InvalidPolicy(format!(
                "backoff_coefficient must be a finite value >= 1.0, got {}",
                self.backoff_coefficient
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PoolError::InvalidPolicy(format!(
                "jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Wait time before `attempt` (1-based) starts; zero for the first one
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.initial_interval.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let mut delay =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        if let Some(max) = self.max_interval {
            delay = delay.min(max.as_secs_f64());
        }

        if delay.is_finite() {
            let jitter_range = delay * self.jitter;
            // Tiny delays or jitter factors underflow to an empty range
            if jitter_range > 0.0 {
                delay += rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            }
        }

        if delay.is_nan() || delay <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX)
    }

    /// Whether another attempt may follow attempt number `attempt`
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
