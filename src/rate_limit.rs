//! Process-wide request pacing.
//!
//! [`RateLimiter`] holds the time of the last dispatched request. Every
//! invocation passes through [`RateLimiter::acquire`] right before calling
//! the backend, so no two dispatches are closer together than the configured
//! minimum spacing, regardless of how many stages run concurrently.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Pacing gate shared by every invocation of a process (or of one
/// [`ExecCtx`](crate::ExecCtx), which is usually the same thing).
///
/// The last-dispatch timestamp is read, waited on and written under one
/// async lock, so concurrent callers queue up and leave the gate
/// `min_spacing` apart even on a multi-threaded runtime.
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    max_jitter: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a gate with the given minimum spacing and jitter bound.
    pub fn new(min_spacing: Duration, max_jitter: Duration) -> Self {
        Self {
            min_spacing,
            max_jitter,
            last_dispatch: Mutex::new(None),
        }
    }

    /// A gate that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Wait until a dispatch is allowed and claim the slot.
    ///
    /// Returns how long the caller was held back (spacing wait plus jitter).
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_dispatch.lock().await;
        let start = Instant::now();

        if let Some(prev) = *last {
            let wait = self.min_spacing.saturating_sub(prev.elapsed());
            if !wait.is_zero() {
                tracing::debug!(wait_ms = wait.as_millis() as u64, "pacing backend dispatch");
                tokio::time::sleep(wait).await;
            }
        }

        let jitter = self.jitter();
        if !jitter.is_zero() {
            tokio::time::sleep(jitter).await;
        }

        *last = Some(Instant::now());
        start.elapsed()
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(fastrand::f64() * self.max_jitter.as_secs_f64())
    }
}

impl Default for RateLimiter {
    /// Two seconds between dispatches, up to 100 ms of jitter.
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_millis(100))
    }
}
