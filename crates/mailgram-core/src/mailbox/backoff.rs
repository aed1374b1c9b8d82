//! Reconnect delays.

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// What to do after a failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait this long, then reconnect.
    Retry(Duration),
    /// Too many failures in a row: take the long pause, then start over.
    Cooldown(Duration),
}

impl BackoffStep {
    /// How long to wait.
    #[must_use]
    pub const fn delay(self) -> Duration {
        match self {
            Self::Retry(delay) | Self::Cooldown(delay) => delay,
        }
    }
}

/// Exponential backoff with a cap and a long cooldown.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    failures: u32,
    delay: Duration,
}

impl Backoff {
    /// Creates a backoff at its initial delay.
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            delay: policy.initial_delay,
            policy,
            failures: 0,
        }
    }

    /// Records a failure and returns the wait before the next attempt.
    pub fn record_failure(&mut self) -> BackoffStep {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts {
            self.reset();
            return BackoffStep::Cooldown(self.policy.long_pause);
        }
        let delay = self.delay;
        self.delay = self.delay.saturating_mul(2).min(self.policy.max_delay);
        BackoffStep::Retry(delay)
    }

    /// Forgets past failures.
    pub const fn reset(&mut self) {
        self.failures = 0;
        self.delay = self.policy.initial_delay;
    }

    /// Consecutive failures so far.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next failure will wait.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}
