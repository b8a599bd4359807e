//! Retry delay policy for reconnecting to the variable server.
//!
//! The dashboards this client serves simply wait one second and try again,
//! forever. That is the default here (`multiplier = 1.0`, no attempt limit).
//! A multiplier above 1.0 turns the fixed delay into an exponential one:
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max_delay)
//! ```
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use trickwatch_varserver::Backoff;
//!
//! let mut backoff = Backoff::default();
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
//! assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
//!
//! backoff.reset();
//! assert_eq!(backoff.attempt(), 0);
//! ```

use std::time::Duration;

use thiserror::Error;

/// Error type for backoff exhaustion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackoffError {
    /// Maximum retry attempts exceeded with the given limit.
    #[error("Maximum number of attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Retry delay controller.
///
/// Each call to [`Backoff::next_sleep`] counts one failed attempt and returns
/// how long to wait before the next one. A successful connection should call
/// [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    /// The delay before the first retry.
    initial_delay: Duration,

    /// The delay that the next call will return.
    current_delay: Duration,

    /// Upper bound for the delay.
    max_delay: Duration,

    /// Growth factor applied after each attempt; 1.0 keeps the delay fixed.
    multiplier: f64,

    /// Failed attempts since the last reset.
    attempt: u32,

    /// Optional hard limit on attempts; `None` retries forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates a controller with custom timing.
    ///
    /// A multiplier below 1.0 is treated as 1.0 and a `max` smaller than
    /// `initial` is raised to `initial`, so delays never shrink.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier > 1.0 {
            multiplier
        } else {
            1.0
        };
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max.max(initial),
            multiplier,
            attempt: 0,
            max_attempts: None,
        }
    }

    /// A fixed delay retried forever.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay, 1.0)
    }

    /// Sets an explicit maximum number of attempts. `0` disables the limit.
    pub fn set_max_attempts(&mut self, max: u32) {
        self.max_attempts = if max == 0 { None } else { Some(max) };
    }

    /// Resets the controller after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the next sleep duration and advances the schedule.
    ///
    /// # Errors
    ///
    /// Returns `BackoffError::MaxAttemptLimitError` once the attempt limit
    /// (if any) has been used up.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt = self.attempt.saturating_add(1);

        if let Some(limit) = self.max_attempts {
            if self.attempt > limit {
                return Err(BackoffError::MaxAttemptLimitError(limit));
            }
        }

        let sleep = self.current_delay;

        let next = Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier);
        self.current_delay = next.min(self.max_delay);

        Ok(sleep)
    }

    /// Gets the configured maximum delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Gets the explicit maximum attempts limit, if set.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The delay the next call to `next_sleep` will return.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

impl Default for Backoff {
    /// One second, fixed, unlimited.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_default_is_fixed_one_second() {
        let mut backoff = Backoff::default();
        for _ in 0..100 {
            assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
        }
        assert_eq!(backoff.attempt(), 100);
        assert_eq!(backoff.max_attempts(), None);
    }

    #[test]
    fn test_backoff_exponential_progression() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);

        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(4));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(8));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(10));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);

        backoff.next_sleep().unwrap();
        backoff.next_sleep().unwrap();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_max_attempts_exceeded() {
        let mut backoff = Backoff::default();
        backoff.set_max_attempts(2);

        assert!(backoff.next_sleep().is_ok());
        assert!(backoff.next_sleep().is_ok());
        assert_eq!(
            backoff.next_sleep(),
            Err(BackoffError::MaxAttemptLimitError(2))
        );
    }

    #[test]
    fn test_backoff_zero_limit_means_unlimited() {
        let mut backoff = Backoff::default();
        backoff.set_max_attempts(0);
        assert_eq!(backoff.max_attempts(), None);
    }

    #[test]
    fn test_backoff_shrinking_multiplier_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(1), 0.5);
        assert_eq!(backoff.max_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
    }
}
