//! Retry pacing for connection attempts.
//!
//! NATS clients traditionally wait a fixed `reconnect_time_wait` between
//! attempts and give up after `max_reconnect_attempts` consecutive failures.
//! `Backoff` implements that, optionally growing the wait geometrically:
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max_delay)
//! ```
//!
//! With the default multiplier of `1.0` every retry waits `initial`.
//!
//! # Examples
//!
//! ```ignore
//! use std::time::Duration;
//! use natsbee_nats::backoff::Backoff;
//!
//! let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(30), 1.0)
//!     .with_max_attempts(Some(3));
//!
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
//! assert!(backoff.next_sleep().is_err()); // third consecutive failure
//! ```

use std::time::Duration;

use thiserror::Error;

/// Error returned once the consecutive-failure budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackoffError {
    /// `max_attempts` consecutive attempts failed.
    #[error("Maximum number of connection attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Paces reconnection attempts and counts consecutive failures.
///
/// Each call to [`Backoff::next_sleep`] records one failed attempt. When the
/// number of consecutive failures reaches `max_attempts`, the budget is
/// exhausted and no further delay is handed out. A successful connection
/// should call [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay handed out after the first failure.
    initial_delay: Duration,

    /// Delay that will be handed out by the next call to `next_sleep`.
    current_delay: Duration,

    /// Upper bound for any single delay.
    max_delay: Duration,

    /// Growth factor applied after each failure. Values <= 1.0 keep the delay constant.
    multiplier: f64,

    /// Consecutive failures recorded since the last reset.
    attempt: u32,

    /// Consecutive failures tolerated before giving up. `None` retries forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates a backoff with the given timing parameters and no attempt limit.
    ///
    /// `initial` is clamped to `max` so a misconfigured cap never produces a
    /// delay larger than itself.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial = initial.min(max);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier,
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Sets the consecutive-failure budget.
    pub fn with_max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    /// Returns the pacing to its initial state after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Records a failed attempt and returns how long to wait before the next one.
    ///
    /// # Errors
    /// `BackoffError::MaxAttemptLimitError` when this failure uses up the
    /// configured budget.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt = self.attempt.saturating_add(1);

        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return Err(BackoffError::MaxAttemptLimitError(max));
            }
        }

        let sleep = self.current_delay;

        if self.multiplier > 1.0 {
            let next = self.current_delay.as_secs_f64() * self.multiplier;
            self.current_delay = Duration::from_secs_f64(next).min(self.max_delay);
        }

        Ok(sleep)
    }

    /// Delay the next call to `next_sleep` would hand out, without recording a failure.
    ///
    /// Used to pause after a dropped connection before the first reconnect.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for Backoff {
    /// NATS client defaults: 2 second wait, 10 attempts, constant delay.
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(60), 1.0).with_max_attempts(Some(10))
    }
}
