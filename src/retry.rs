//! Bounded retry state machine for backend invocations.
//!
//! One [`RetryState`] lives for exactly one invocation:
//!
//! ```text
//! Attempting(n) ──ok──► done
//!       │
//!     failure
//!       ▼
//! on_failure() ──► Retry { attempt: n + 1, delay }  (n < max_attempts)
//!              └─► Exhausted                        (n == max_attempts)
//! ```
//!
//! The state machine only computes transitions and delays; sleeping is the
//! caller's job, so the attempt cap and backoff formula can be tested without
//! timers.

use crate::error::{FailureKind, InvocationError, StageFailure};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt cap and backoff parameters shared by every invocation.
///
/// # Example
///
/// ```
/// use strategy_pipeline::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
/// // After the first failure: base * 2^1
/// assert_eq!(policy.backoff(1), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per invocation, the first one included. Default: 3.
    pub max_attempts: u32,

    /// Base of the exponential backoff. Default: 1 second.
    pub base_delay: Duration,

    /// Upper bound on the computed backoff. Default: 60 seconds.
    pub max_delay: Duration,

    /// Extra random spread added on top of the backoff for rate-limit
    /// failures only. Default: 1 second.
    pub rate_limit_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            rate_limit_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_rate_limit_jitter(mut self, jitter: Duration) -> Self {
        self.rate_limit_jitter = jitter;
        self
    }

    /// Deterministic backoff after `failures` failed attempts:
    /// `base_delay * 2^failures`, capped at `max_delay`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2f64.powi(failures.min(62) as i32);
        let secs = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Delay before the next attempt, given a jitter sample in `[0, 1]`.
    ///
    /// Rate-limit failures get `jitter_sample * rate_limit_jitter` added and
    /// never wait less than the server's `Retry-After` hint.
    pub fn delay_with_sample(&self, failures: u32, error: &InvocationError, jitter_sample: f64) -> Duration {
        let base = self.backoff(failures);
        match error.kind {
            FailureKind::RateLimited => {
                let spread = self.rate_limit_jitter.mul_f64(jitter_sample.clamp(0.0, 1.0));
                let delay = base + spread;
                match error.retry_after {
                    Some(hint) if hint > delay => hint,
                    _ => delay,
                }
            }
            FailureKind::Timeout | FailureKind::Generic => base,
        }
    }

    /// Delay before the next attempt with a random jitter sample.
    pub fn delay_for(&self, failures: u32, error: &InvocationError) -> Duration {
        self.delay_with_sample(failures, error, fastrand::f64())
    }
}

/// What the invoker should do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Sleep `delay`, then make attempt number `attempt` (1-based).
    Retry { attempt: u32, delay: Duration },
    /// The attempt cap is reached.
    Exhausted,
}

/// Per-invocation counters. Dropped when the invocation resolves.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempt: u32,
    last_failure: Option<InvocationError>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the next attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn last_failure(&self) -> Option<&InvocationError> {
        self.last_failure.as_ref()
    }

    /// Record a failed attempt and decide what happens next.
    pub fn on_failure(&mut self, error: InvocationError, policy: &RetryPolicy) -> Transition {
        let transition = if self.attempt >= policy.max_attempts {
            Transition::Exhausted
        } else {
            Transition::Retry {
                attempt: self.attempt + 1,
                delay: policy.delay_for(self.attempt, &error),
            }
        };
        self.last_failure = Some(error);
        transition
    }

    /// Terminal failure for `stage`, classified like the last observed failure.
    pub fn into_failure(self, stage: &str) -> StageFailure {
        let (kind, message) = match self.last_failure {
            Some(err) => (err.kind, err.message),
            None => (FailureKind::Generic, "no attempt was made".to_string()),
        };
        StageFailure {
            stage: stage.to_string(),
            kind,
            attempts: self.attempt,
            message,
        }
    }
}
