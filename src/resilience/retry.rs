//! Retry policy and the per-call retry state machine.
//!
//! The state machine only decides; it never sleeps. The caller owns the
//! clock and the delay, so tests can step through a whole retry sequence
//! without waiting.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with proportional jitter.
///
/// The delay before retry `n` (1-based) is
/// `min(base_delay * multiplier^(n-1) * (1 + jitter * u), max_delay)` with
/// `u` uniform in `[0, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay before the first retry, before jitter
    pub base_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub multiplier: f64,

    /// Jitter factor (0.0-1.0), as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the maximum number of attempts
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base and maximum delays
    #[must_use]
    pub const fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Set the backoff multiplier
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry `retry` (1-based) for a jitter draw `unit` in
    /// `[0, 1)`. Capped at `max_delay`.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32, unit: f64) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64()
            * self.multiplier.powi(exponent)
            * self.jitter.mul_add(unit.clamp(0.0, 1.0), 1.0);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}

/// What to do after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry {
        /// Upcoming attempt number (1-based).
        attempt: u32,
        /// Backoff before it.
        delay: Duration,
    },
    /// Budget spent.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Attempt counter and backoff sequence for one call.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
    last_delay: Duration,
}

impl RetryState {
    /// Fresh state: no attempts made.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Record the start of an attempt and return its number (1-based).
    pub const fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Attempts started so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decide after a retryable failure, drawing jitter at random.
    pub fn on_failure(&mut self) -> RetryDecision {
        let unit: f64 = rand::rng().random();
        self.on_failure_with(unit)
    }

    /// Decide after a retryable failure with an explicit jitter draw.
    ///
    /// Delays never shrink from one retry to the next, whatever the draws.
    pub fn on_failure_with(&mut self, unit: f64) -> RetryDecision {
        if self.attempts >= self.policy.max_attempts {
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        let delay = self
            .policy
            .delay_for_retry(self.attempts, unit)
            .max(self.last_delay)
            .min(self.policy.max_delay);
        self.last_delay = delay;
        RetryDecision::Retry {
            attempt: self.attempts + 1,
            delay,
        }
    }
}
